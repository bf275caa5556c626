//! The per-connection driver of the Thrift proxy.
//!
//! A [`ConnectionManager`] owns one downstream connection's request
//! decoder and the ordered set of in-flight requests ([`ActiveRpc`]s).
//! Bytes arrive through [`ConnectionManager::on_data`]; the dispatch loop
//! pumps the decoder, which synthesises a new rpc at each message
//! boundary and fires decoder events into it. Filters may pause the loop
//! at any event and resume it with `continue_decoding`. Upstream response
//! bytes for a request re-enter through the stream-id-keyed entry points
//! (or the filter callbacks) and are re-framed downstream by the rpc's
//! response decoder, carrying the sequence id the client originally sent.

mod active_rpc;
mod response_decoder;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::BytesMut;
use log::{debug, error, trace};

pub(crate) use active_rpc::ActiveRpc;

use crate::{
    config::Config,
    decoder::{DecodeStatus, Decoder, DecoderCallbacks, DecoderEvent, FilterStatus},
    downstream::{CloseMode, ConnectionEvent, DownstreamConnection},
    error::DecodeError,
    metadata::{MessageMetadata, MessageType},
    protocol::Protocol,
    reply::DirectResponse,
    stats::ProxyStats,
    transport::Transport,
};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate a process-unique stream id.
fn next_stream_id() -> u64 { NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed) }

/// Connection state shared with rpc logic: everything a request or its
/// response decoder may need except the rpc list itself.
pub(crate) struct Core {
    pub(crate) config: Arc<dyn Config>,
    pub(crate) stats: ProxyStats,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) protocol: Box<dyn Protocol>,
    pub(crate) downstream: Box<dyn DownstreamConnection>,
    pub(crate) stopped: bool,
    pub(crate) half_closed: bool,
    pub(crate) resume_pending: bool,
}

impl Core {
    /// Encode `response` with the downstream protocol, frame it with the
    /// downstream transport and write it without ending the stream.
    pub(crate) fn send_local_reply(
        &mut self,
        metadata: &mut MessageMetadata,
        response: &dyn DirectResponse,
    ) {
        let mut payload = BytesMut::new();
        response.encode(metadata, self.protocol.as_ref(), &mut payload);
        metadata.set_protocol(self.protocol.protocol_type());
        let mut framed = BytesMut::new();
        if let Err(err) = self.transport.encode_frame(&mut framed, metadata, payload) {
            error!("failed to frame local reply: {err}");
            return;
        }
        self.downstream.write(framed, false);
    }
}

/// Per-connection Thrift proxy driver.
pub struct ConnectionManager {
    core: Core,
    decoder: Decoder,
    request_buffer: BytesMut,
    rpcs: VecDeque<ActiveRpc>,
}

impl ConnectionManager {
    /// Bind a manager to a downstream connection.
    ///
    /// Half-close is enabled on the connection so the peer can shut its
    /// write side while replies are still pending.
    #[must_use]
    pub fn new(config: Arc<dyn Config>, mut downstream: Box<dyn DownstreamConnection>) -> Self {
        downstream.enable_half_close(true);
        let stats = config.stats().clone();
        let transport = config.create_transport();
        let protocol = config.create_protocol();
        let decoder = Decoder::new(config.create_transport(), config.create_protocol());
        Self {
            core: Core {
                config,
                stats,
                transport,
                protocol,
                downstream,
                stopped: false,
                half_closed: false,
                resume_pending: false,
            },
            decoder,
            request_buffer: BytesMut::new(),
            rpcs: VecDeque::new(),
        }
    }

    /// Absorb downstream bytes and run the dispatch loop.
    ///
    /// Always returns [`FilterStatus::StopIteration`]: this is a terminal
    /// network filter and nothing runs after it.
    pub fn on_data(&mut self, data: &mut BytesMut, end_stream: bool) -> FilterStatus {
        self.request_buffer.unsplit(data.split());
        self.dispatch();

        if end_stream {
            trace!("downstream half-closed");

            // Downstream has closed. Unless an outstanding oneway still
            // needs its upstream, close now; the oneway case waits so the
            // upstream still receives the request.
            if self.core.stopped {
                if let Some(metadata) = self.rpcs.back().and_then(ActiveRpc::metadata) {
                    if metadata.message_type() == Some(MessageType::Oneway) {
                        trace!("waiting for one-way completion");
                        self.core.half_closed = true;
                        return FilterStatus::StopIteration;
                    }
                }
            }

            self.reset_all_rpcs(false);
            self.core.downstream.close(CloseMode::FlushWrite);
        }

        FilterStatus::StopIteration
    }

    /// React to a connection lifecycle event. Any close resets all
    /// outstanding requests, tagged local or remote for stats.
    pub fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {}
            ConnectionEvent::RemoteClose => self.reset_all_rpcs(false),
            ConnectionEvent::LocalClose => self.reset_all_rpcs(true),
        }
    }

    /// Resume a dispatch loop paused by a filter.
    pub fn continue_decoding(&mut self) {
        debug!("thrift filter continued");
        self.core.stopped = false;
        self.dispatch();

        if !self.core.stopped && self.core.half_closed {
            // Half-closed and no longer waiting on an upstream: drain and
            // close.
            self.reset_all_rpcs(false);
            self.core.downstream.close(CloseMode::FlushWrite);
        }
    }

    /// Install the response decoder for the rpc identified by
    /// `stream_id`, parameterised by the upstream's transport and
    /// protocol.
    ///
    /// This is the out-of-delivery twin of
    /// [`crate::filter::DecoderFilterCallbacks::start_upstream_response`].
    pub fn start_upstream_response(
        &mut self,
        stream_id: u64,
        transport: Box<dyn Transport>,
        protocol: Box<dyn Protocol>,
    ) {
        match self.rpc_mut(stream_id) {
            Some(rpc) => rpc.start_upstream_response(transport, protocol),
            None => debug!("start_upstream_response for unknown stream id {stream_id}"),
        }
    }

    /// Feed upstream response bytes to the rpc identified by `stream_id`.
    /// Returns whether that response is complete.
    ///
    /// This is the out-of-delivery twin of
    /// [`crate::filter::DecoderFilterCallbacks::upstream_data`].
    pub fn upstream_data(&mut self, stream_id: u64, data: &mut BytesMut) -> bool {
        let Some(index) = self.rpcs.iter().position(|rpc| rpc.stream_id() == stream_id) else {
            debug!("upstream data for unknown stream id {stream_id}");
            return true;
        };
        let complete = self.rpcs[index].upstream_data(&mut self.core, data);
        self.collect_retired();
        complete
    }

    /// The number of in-flight requests, retired ones included until
    /// their deferred destruction.
    #[must_use]
    pub fn active_rpcs(&self) -> usize { self.rpcs.len() }

    fn rpc_mut(&mut self, stream_id: u64) -> Option<&mut ActiveRpc> {
        self.rpcs.iter_mut().find(|rpc| rpc.stream_id() == stream_id)
    }

    /// Pump the decoder until underflow or pause.
    fn dispatch(&mut self) {
        if self.core.stopped {
            debug!("thrift filter stopped");
            return;
        }

        if let Err(err) = self.drive_decoder() {
            self.on_decode_error(&err);
        }
    }

    fn drive_decoder(&mut self) -> Result<(), DecodeError> {
        loop {
            let mut sink = RequestSink {
                rpcs: &mut self.rpcs,
                core: &mut self.core,
            };
            let status = self.decoder.on_data(&mut self.request_buffer, &mut sink)?;
            self.collect_retired();
            match status {
                DecodeStatus::Underflow => {
                    self.core.resume_pending = false;
                    return Ok(());
                }
                DecodeStatus::Complete => {
                    self.core.resume_pending = false;
                }
                DecodeStatus::Stopped => {
                    if self.core.resume_pending {
                        self.core.resume_pending = false;
                        continue;
                    }
                    self.core.stopped = true;
                    return Ok(());
                }
            }
        }
    }

    /// A decode error is fatal to the connection: reply if possible, then
    /// tear everything down.
    fn on_decode_error(&mut self, err: &DecodeError) {
        match err {
            DecodeError::App(ex) => {
                error!("thrift application exception: {ex}");
                let mut metadata = self
                    .rpcs
                    .back()
                    .and_then(|rpc| rpc.metadata().cloned())
                    .unwrap_or_else(|| {
                        let mut metadata = MessageMetadata::new();
                        metadata.set_sequence_id(0);
                        metadata
                    });
                self.core.send_local_reply(&mut metadata, ex);
            }
            err => {
                error!("thrift error: {err}");
                // Use the current rpc to send an error downstream, if
                // possible.
                if let Some(rpc) = self.rpcs.back_mut() {
                    rpc.on_error(&mut self.core, &err.to_string());
                }
            }
        }

        self.core.stats.request_decoding_error.inc();
        self.sweep(false);
        self.reset_all_rpcs(true);
        self.core.downstream.close(CloseMode::FlushWrite);
    }

    /// Drain the rpc list head-first, accounting each live request
    /// against the close locality.
    fn reset_all_rpcs(&mut self, local_reset: bool) {
        while let Some(mut rpc) = self.rpcs.pop_front() {
            if local_reset {
                debug!("local close with active request");
                self.core.stats.cx_destroy_local_with_active_rq.inc();
            } else {
                debug!("remote close with active request");
                self.core.stats.cx_destroy_remote_with_active_rq.inc();
            }
            rpc.on_reset();
            self.core.downstream.defer_delete(Box::new(rpc));
        }
    }

    /// Splice retired rpcs out of the list and hand them to deferred
    /// destruction. The rpc currently receiving decoder events survives
    /// until its frame completes.
    fn collect_retired(&mut self) { self.sweep(self.decoder.frame_in_progress()); }

    fn sweep(&mut self, keep_decoding_tail: bool) {
        if !self.rpcs.iter().any(ActiveRpc::is_retired) {
            return;
        }
        let count = self.rpcs.len();
        let rpcs = std::mem::take(&mut self.rpcs);
        for (index, rpc) in rpcs.into_iter().enumerate() {
            let decoding_tail = keep_decoding_tail && index + 1 == count;
            if rpc.is_retired() && !decoding_tail {
                trace!("destroying rpc, stream id {}", rpc.stream_id());
                self.core.downstream.defer_delete(Box::new(rpc));
            } else {
                self.rpcs.push_back(rpc);
            }
        }
    }
}

/// Routes decoder events for the request stream into the newest rpc.
struct RequestSink<'a> {
    rpcs: &'a mut VecDeque<ActiveRpc>,
    core: &'a mut Core,
}

impl DecoderCallbacks for RequestSink<'_> {
    fn new_decoder_event_handler(&mut self) -> Result<(), DecodeError> {
        trace!("new request message");
        let mut rpc = ActiveRpc::new(next_stream_id());
        rpc.create_filter_chain(self.core.config.filter_factory());
        self.rpcs.push_back(rpc);
        Ok(())
    }

    fn message_begin(&mut self, metadata: MessageMetadata) -> Result<FilterStatus, DecodeError> {
        let core = &mut *self.core;
        let rpc = self.rpcs.back_mut().expect("decoder event without an active rpc");
        rpc.message_begin(core, metadata)
    }

    fn event(&mut self, event: DecoderEvent) -> Result<FilterStatus, DecodeError> {
        let core = &mut *self.core;
        let rpc = self.rpcs.back_mut().expect("decoder event without an active rpc");
        match event {
            DecoderEvent::TransportEnd => rpc.transport_end(core),
            event => Ok(rpc.deliver(core, &event)),
        }
    }
}
