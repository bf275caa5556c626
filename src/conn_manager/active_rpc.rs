//! Per-request state and event policy.
//!
//! An [`ActiveRpc`] plays two roles backed by one state record: it is the
//! decoder event handler for its request (forwarding events into the
//! filter chain, or into an upgrade handler once redirected), and it is
//! the capability surface filters operate through
//! ([`DecoderFilterCallbacks`], realised by the split-borrow [`RpcView`]).

use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, error};

use super::{
    response_decoder::{ResponseCtx, ResponseDecoder},
    Core,
};
use crate::{
    decoder::{DecoderEvent, FilterStatus},
    downstream::{CloseMode, DownstreamConnection},
    error::{AppException, AppExceptionType, DecodeError},
    filter::{DecoderFilter, DecoderFilterCallbacks, FilterChainFactory, FilterChainFactoryCallbacks},
    metadata::{MessageMetadata, MessageType},
    protocol::{Protocol, UpgradeHandler},
    reply::DirectResponse,
    router::Route,
    transport::Transport,
};

/// One in-flight request.
pub(crate) struct ActiveRpc {
    stream_id: u64,
    metadata: Option<MessageMetadata>,
    original_sequence_id: i32,
    upgrade_handler: Option<Box<dyn UpgradeHandler>>,
    filters: Vec<Box<dyn DecoderFilter>>,
    response_decoder: Option<ResponseDecoder>,
    cached_route: Option<Option<Arc<dyn Route>>>,
    response_buffer: BytesMut,
    retired: bool,
}

impl ActiveRpc {
    pub(crate) fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            metadata: None,
            original_sequence_id: 0,
            upgrade_handler: None,
            filters: Vec::new(),
            response_decoder: None,
            cached_route: None,
            response_buffer: BytesMut::new(),
            retired: false,
        }
    }

    pub(crate) fn stream_id(&self) -> u64 { self.stream_id }

    pub(crate) fn metadata(&self) -> Option<&MessageMetadata> { self.metadata.as_ref() }

    pub(crate) fn is_retired(&self) -> bool { self.retired }

    pub(crate) fn create_filter_chain(&mut self, factory: &dyn FilterChainFactory) {
        factory.create_filter_chain(self);
    }

    /// The request envelope has been decoded: capture the original
    /// sequence id and, for an upgrade request on a protocol that
    /// supports it, redirect all further events into the protocol's
    /// upgrade decoder.
    pub(crate) fn message_begin(
        &mut self,
        core: &mut Core,
        metadata: MessageMetadata,
    ) -> Result<FilterStatus, DecodeError> {
        self.original_sequence_id =
            metadata.sequence_id().expect("message envelope without a sequence id");

        if metadata.is_protocol_upgrade() && core.protocol.supports_upgrade() {
            debug!("thrift: decoding protocol upgrade request");
            self.upgrade_handler = Some(
                core.protocol
                    .upgrade_request_decoder()
                    .expect("protocol advertised upgrade support"),
            );
        }

        self.metadata = Some(metadata);

        if let Some(handler) = self.upgrade_handler.as_mut() {
            let metadata = self.metadata.as_ref().expect("metadata stored above");
            return Ok(handler.message_begin(metadata));
        }

        Ok(self.scoped(core, |filters, view| {
            let mut status = FilterStatus::Continue;
            for filter in filters.iter_mut() {
                if filter.message_begin(view) == FilterStatus::StopIteration {
                    status = FilterStatus::StopIteration;
                    break;
                }
            }
            status
        }))
    }

    /// The request frame is complete: account it, retire oneways, forward
    /// the event, and answer upgrades with a local reply.
    pub(crate) fn transport_end(&mut self, core: &mut Core) -> Result<FilterStatus, DecodeError> {
        let metadata = self.metadata.as_ref().expect("transport end without message metadata");
        let message_type =
            metadata.message_type().expect("message envelope without a message type");
        let is_upgrade = metadata.is_protocol_upgrade();

        core.stats.request.inc();
        match message_type {
            MessageType::Call => core.stats.request_call.inc(),
            MessageType::Oneway => {
                core.stats.request_oneway.inc();
                // No response forthcoming; the rpc is collected once the
                // frame is done with it.
                self.retired = true;
            }
            _ => core.stats.request_invalid_type.inc(),
        }

        let status = self.deliver(core, &DecoderEvent::TransportEnd);

        if is_upgrade {
            debug!("thrift: sending protocol upgrade response");
            let response = self
                .upgrade_handler
                .as_ref()
                .expect("upgrade message without an upgrade handler")
                .upgrade_response();
            self.send_local_reply(core, response.as_ref());
        }

        Ok(status)
    }

    /// Forward a decoder event to the active handler.
    pub(crate) fn deliver(&mut self, core: &mut Core, event: &DecoderEvent) -> FilterStatus {
        if let Some(handler) = self.upgrade_handler.as_mut() {
            return handler.event(event);
        }
        self.scoped(core, |filters, view| {
            let mut status = FilterStatus::Continue;
            for filter in filters.iter_mut() {
                if filter.event(event, view) == FilterStatus::StopIteration {
                    status = FilterStatus::StopIteration;
                    break;
                }
            }
            status
        })
    }

    /// Restore the request's original sequence id, write the reply and
    /// retire.
    pub(crate) fn send_local_reply(&mut self, core: &mut Core, response: &dyn DirectResponse) {
        let metadata = self.metadata.as_mut().expect("local reply without message metadata");
        metadata.set_sequence_id(self.original_sequence_id);
        core.send_local_reply(metadata, response);
        self.retired = true;
    }

    /// The connection is resetting this request.
    pub(crate) fn on_reset(&mut self) {
        for filter in &mut self.filters {
            filter.on_reset();
        }
        self.retired = true;
    }

    /// A decode error was attributed to this request. A reply is only
    /// possible once the envelope was parsed; before that there is
    /// nothing valid to reply into.
    pub(crate) fn on_error(&mut self, core: &mut Core, what: &str) {
        if self.metadata.is_some() {
            self.send_local_reply(
                core,
                &AppException::new(AppExceptionType::ProtocolError, what),
            );
        }
    }

    pub(crate) fn start_upstream_response(
        &mut self,
        transport: Box<dyn Transport>,
        protocol: Box<dyn Protocol>,
    ) {
        assert!(self.response_decoder.is_none(), "upstream response already started");
        self.response_decoder = Some(ResponseDecoder::new(transport, protocol));
    }

    /// Feed upstream bytes through the response decoder. Completion
    /// retires the rpc; errors synthesise a reply where possible and ask
    /// the chain to reset its upstream.
    pub(crate) fn upstream_data(&mut self, core: &mut Core, data: &mut BytesMut) -> bool {
        let result = {
            let ctx = ResponseCtx {
                core: &mut *core,
                original_sequence_id: self.original_sequence_id,
                response_buffer: &mut self.response_buffer,
            };
            self.response_decoder
                .as_mut()
                .expect("upstream data before the response was started")
                .on_data(data, ctx)
        };

        match result {
            Ok(complete) => {
                if complete {
                    self.retired = true;
                }
                complete
            }
            Err(DecodeError::App(ex)) => {
                error!("thrift response application error: {ex}");
                core.stats.response_decoding_error.inc();
                self.send_local_reply(core, &ex);
                self.reset_upstream();
                true
            }
            Err(err) => {
                error!("thrift response error: {err}");
                core.stats.response_decoding_error.inc();
                self.on_error(core, &err.to_string());
                self.reset_upstream();
                true
            }
        }
    }

    fn reset_upstream(&mut self) {
        for filter in &mut self.filters {
            filter.reset_upstream_connection();
        }
    }

    /// Split this rpc into its filter list and a callbacks view over the
    /// rest, run `f`, and apply any upstream reset the view recorded.
    fn scoped<R>(
        &mut self,
        core: &mut Core,
        f: impl FnOnce(&mut [Box<dyn DecoderFilter>], &mut dyn DecoderFilterCallbacks) -> R,
    ) -> R {
        let Self {
            stream_id,
            metadata,
            original_sequence_id,
            upgrade_handler: _,
            filters,
            response_decoder,
            cached_route,
            response_buffer,
            retired,
        } = self;
        let mut view = RpcView {
            core,
            stream_id: *stream_id,
            original_sequence_id: *original_sequence_id,
            metadata,
            response_decoder,
            cached_route,
            response_buffer,
            retired,
            reset_upstream: false,
        };
        let result = f(filters, &mut view);
        if view.reset_upstream {
            for filter in filters.iter_mut() {
                filter.reset_upstream_connection();
            }
        }
        result
    }
}

impl FilterChainFactoryCallbacks for ActiveRpc {
    fn add_decoder_filter(&mut self, filter: Box<dyn DecoderFilter>) { self.filters.push(filter); }
}

/// The filter-facing capability surface, borrowing one rpc's state minus
/// its filter list.
struct RpcView<'a> {
    core: &'a mut Core,
    stream_id: u64,
    original_sequence_id: i32,
    metadata: &'a mut Option<MessageMetadata>,
    response_decoder: &'a mut Option<ResponseDecoder>,
    cached_route: &'a mut Option<Option<Arc<dyn Route>>>,
    response_buffer: &'a mut BytesMut,
    retired: &'a mut bool,
    reset_upstream: bool,
}

impl DecoderFilterCallbacks for RpcView<'_> {
    fn stream_id(&self) -> u64 { self.stream_id }

    fn metadata(&self) -> Option<&MessageMetadata> { self.metadata.as_ref() }

    fn downstream(&mut self) -> &mut dyn DownstreamConnection { self.core.downstream.as_mut() }

    fn continue_decoding(&mut self) { self.core.resume_pending = true; }

    fn route(&mut self) -> Option<Arc<dyn Route>> {
        let Self {
            core,
            stream_id,
            metadata,
            cached_route,
            ..
        } = self;
        if cached_route.is_none() {
            let resolved = match metadata.as_ref() {
                Some(metadata) => core.config.router().route(metadata, *stream_id),
                None => None,
            };
            **cached_route = Some(resolved);
        }
        cached_route.clone().flatten()
    }

    fn send_local_reply(&mut self, response: &dyn DirectResponse) {
        let metadata = self.metadata.as_mut().expect("local reply without message metadata");
        metadata.set_sequence_id(self.original_sequence_id);
        self.core.send_local_reply(metadata, response);
        *self.retired = true;
    }

    fn start_upstream_response(
        &mut self,
        transport: Box<dyn Transport>,
        protocol: Box<dyn Protocol>,
    ) {
        assert!(self.response_decoder.is_none(), "upstream response already started");
        *self.response_decoder = Some(ResponseDecoder::new(transport, protocol));
    }

    fn upstream_data(&mut self, data: &mut BytesMut) -> bool {
        let result = {
            let ctx = ResponseCtx {
                core: &mut *self.core,
                original_sequence_id: self.original_sequence_id,
                response_buffer: &mut *self.response_buffer,
            };
            self.response_decoder
                .as_mut()
                .expect("upstream data before the response was started")
                .on_data(data, ctx)
        };

        match result {
            Ok(complete) => {
                if complete {
                    *self.retired = true;
                }
                complete
            }
            Err(DecodeError::App(ex)) => {
                error!("thrift response application error: {ex}");
                self.core.stats.response_decoding_error.inc();
                self.send_local_reply(&ex);
                self.reset_upstream = true;
                true
            }
            Err(err) => {
                error!("thrift response error: {err}");
                self.core.stats.response_decoding_error.inc();
                if self.metadata.is_some() {
                    let ex = AppException::new(AppExceptionType::ProtocolError, err.to_string());
                    self.send_local_reply(&ex);
                }
                self.reset_upstream = true;
                true
            }
        }
    }

    fn reset_downstream_connection(&mut self) { self.core.downstream.close(CloseMode::NoFlush); }
}
