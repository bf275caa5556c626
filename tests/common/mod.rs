//! Shared fixtures for the integration tests: a recording downstream
//! connection, a capturing filter, and framed binary message builders.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use thriftwire::{
    filter::{DecoderFilter, DecoderFilterCallbacks, FilterChainFactory, FilterChainFactoryCallbacks},
    protocol::BinaryProtocol,
    transport::FramedTransport,
    CloseMode, DecoderEvent, DownstreamConnection, FieldType, FilterStatus, MessageMetadata,
    MessageType, Protocol, Transport,
};

/// Shared view of everything a [`RecordingConnection`] observed.
#[derive(Clone, Default)]
pub struct ConnectionLog(Arc<Mutex<LogState>>);

#[derive(Default)]
struct LogState {
    writes: Vec<BytesMut>,
    closes: Vec<CloseMode>,
    deferred: usize,
}

impl ConnectionLog {
    pub fn writes(&self) -> Vec<BytesMut> { self.0.lock().expect("log lock").writes.clone() }

    pub fn closes(&self) -> Vec<CloseMode> { self.0.lock().expect("log lock").closes.clone() }

    pub fn deferred(&self) -> usize { self.0.lock().expect("log lock").deferred }
}

/// A downstream connection that records instead of writing to a socket.
pub struct RecordingConnection(ConnectionLog);

impl RecordingConnection {
    pub fn new() -> (Box<dyn DownstreamConnection>, ConnectionLog) {
        let log = ConnectionLog::default();
        (Box::new(Self(log.clone())), log)
    }
}

impl DownstreamConnection for RecordingConnection {
    fn write(&mut self, data: BytesMut, _end_stream: bool) {
        self.0 .0.lock().expect("log lock").writes.push(data);
    }

    fn close(&mut self, mode: CloseMode) {
        self.0 .0.lock().expect("log lock").closes.push(mode);
    }

    fn enable_half_close(&mut self, _enabled: bool) {}

    fn defer_delete(&mut self, item: Box<dyn std::any::Any + Send>) {
        self.0 .0.lock().expect("log lock").deferred += 1;
        drop(item);
    }
}

/// Shared view of what [`CaptureFilter`] instances observed.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<CaptureState>>);

#[derive(Default)]
struct CaptureState {
    stream_ids: Vec<u64>,
    events: usize,
    upstream_resets: usize,
}

impl Capture {
    pub fn stream_ids(&self) -> Vec<u64> {
        self.0.lock().expect("capture lock").stream_ids.clone()
    }

    pub fn events(&self) -> usize { self.0.lock().expect("capture lock").events }

    pub fn upstream_resets(&self) -> usize {
        self.0.lock().expect("capture lock").upstream_resets
    }
}

/// A pass-through filter that records stream ids and event counts.
pub struct CaptureFilter(Capture);

impl CaptureFilter {
    /// A factory installing one capture filter per request, plus the
    /// handle to the captured state.
    pub fn factory() -> (Arc<dyn FilterChainFactory>, Capture) {
        let capture = Capture::default();
        let handle = capture.clone();
        let factory = Arc::new(move |callbacks: &mut dyn FilterChainFactoryCallbacks| {
            callbacks.add_decoder_filter(Box::new(CaptureFilter(capture.clone())));
        });
        (factory, handle)
    }
}

impl DecoderFilter for CaptureFilter {
    fn message_begin(&mut self, callbacks: &mut dyn DecoderFilterCallbacks) -> FilterStatus {
        self.0 .0.lock().expect("capture lock").stream_ids.push(callbacks.stream_id());
        FilterStatus::Continue
    }

    fn event(
        &mut self,
        _event: &DecoderEvent,
        _callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterStatus {
        self.0 .0.lock().expect("capture lock").events += 1;
        FilterStatus::Continue
    }

    fn reset_upstream_connection(&mut self) {
        self.0 .0.lock().expect("capture lock").upstream_resets += 1;
    }
}

/// Encode one framed binary message whose root struct is filled in by
/// `body`.
pub fn framed_message(
    method: &str,
    message_type: MessageType,
    sequence_id: i32,
    body: impl FnOnce(&BinaryProtocol, &mut BytesMut),
) -> BytesMut {
    let protocol = BinaryProtocol;
    let mut payload = BytesMut::new();
    protocol.write_message_begin(&mut payload, method, message_type, sequence_id);
    protocol.write_struct_begin(&mut payload, "");
    body(&protocol, &mut payload);
    protocol.write_field_begin(&mut payload, "", FieldType::Stop, 0);
    protocol.write_struct_end(&mut payload);
    protocol.write_message_end(&mut payload);

    let mut framed = BytesMut::new();
    FramedTransport::default()
        .encode_frame(&mut framed, &MessageMetadata::new(), payload)
        .expect("frame message");
    framed
}

/// A framed binary message with an empty root struct.
pub fn empty_message(method: &str, message_type: MessageType, sequence_id: i32) -> BytesMut {
    framed_message(method, message_type, sequence_id, |_, _| {})
}

/// A framed binary Reply whose struct sets exactly one bool field with
/// the given id (id 0 is the Thrift success convention).
pub fn framed_reply(method: &str, sequence_id: i32, first_field_id: i16) -> BytesMut {
    framed_message(method, MessageType::Reply, sequence_id, |protocol, payload| {
        protocol.write_field_begin(payload, "", FieldType::Bool, first_field_id);
        protocol.write_bool(payload, true);
        protocol.write_field_end(payload);
    })
}

/// Decode the envelope of a framed binary message.
pub fn decode_envelope(frame: &mut BytesMut) -> MessageMetadata {
    FramedTransport::default()
        .decode_frame_start(frame)
        .expect("frame")
        .expect("frame header");
    BinaryProtocol
        .read_message_begin(frame)
        .expect("decode")
        .expect("envelope")
}
