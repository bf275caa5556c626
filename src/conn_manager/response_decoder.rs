//! Decoding of one upstream reply and its re-framing for downstream.
//!
//! The upstream may use a different transport and protocol from the
//! downstream, and is free to renumber sequence ids on the wire. The
//! response decoder re-encodes every event through the downstream
//! protocol and rewrites the sequence id back to the one the client
//! originally sent, so the proxy hop is invisible to the client.

use bytes::BytesMut;

use super::Core;
use crate::{
    decoder::{DecodeStatus, Decoder, DecoderCallbacks, DecoderEvent, FilterStatus},
    error::DecodeError,
    metadata::{FieldType, MessageMetadata, MessageType},
    protocol::{write_event, Protocol},
    transport::{new_transport, Transport},
};

/// Connection state lent to the response decoder for one data call.
pub(crate) struct ResponseCtx<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) original_sequence_id: i32,
    pub(crate) response_buffer: &'a mut BytesMut,
}

/// Decodes one upstream reply and writes the converted frame downstream.
pub(crate) struct ResponseDecoder {
    decoder: Decoder,
    upstream_buffer: BytesMut,
    metadata: Option<MessageMetadata>,
    first_reply_field: bool,
    success: Option<bool>,
    complete: bool,
}

impl ResponseDecoder {
    pub(crate) fn new(transport: Box<dyn Transport>, protocol: Box<dyn Protocol>) -> Self {
        Self {
            decoder: Decoder::new(transport, protocol),
            upstream_buffer: BytesMut::new(),
            metadata: None,
            first_reply_field: false,
            success: None,
            complete: false,
        }
    }

    /// Append upstream bytes and decode to underflow. Returns whether the
    /// response is complete.
    pub(crate) fn on_data(
        &mut self,
        data: &mut BytesMut,
        ctx: ResponseCtx<'_>,
    ) -> Result<bool, DecodeError> {
        self.upstream_buffer.unsplit(data.split());

        let Self {
            decoder,
            upstream_buffer,
            metadata,
            first_reply_field,
            success,
            complete,
        } = self;
        let mut sink = ResponseSink {
            ctx,
            metadata,
            first_reply_field,
            success,
            complete,
        };
        loop {
            match decoder.on_data(upstream_buffer, &mut sink)? {
                DecodeStatus::Underflow | DecodeStatus::Complete => break,
                DecodeStatus::Stopped => unreachable!("response handlers never pause decoding"),
            }
        }

        Ok(self.complete)
    }
}

/// Event handler for the reply: rewrites identity, watches the first
/// reply field for the success/error verdict, and converts everything
/// else through the downstream protocol.
struct ResponseSink<'a> {
    ctx: ResponseCtx<'a>,
    metadata: &'a mut Option<MessageMetadata>,
    first_reply_field: &'a mut bool,
    success: &'a mut Option<bool>,
    complete: &'a mut bool,
}

impl ResponseSink<'_> {
    fn transport_end(&mut self) -> Result<FilterStatus, DecodeError> {
        let metadata = self.metadata.as_mut().expect("response transport end without metadata");
        let core = &mut *self.ctx.core;

        // Re-frame with a fresh transport of the downstream decoder's
        // active type, so the frame never inherits upstream framing.
        let mut transport = new_transport(core.transport.transport_type());
        metadata.set_protocol(core.protocol.protocol_type());
        let mut framed = BytesMut::new();
        transport.encode_frame(&mut framed, metadata, self.ctx.response_buffer.split())?;
        *self.complete = true;

        core.downstream.write(framed, false);

        core.stats.response.inc();
        match metadata.message_type() {
            Some(MessageType::Reply) => {
                core.stats.response_reply.inc();
                if self.success.unwrap_or(false) {
                    core.stats.response_success.inc();
                } else {
                    core.stats.response_error.inc();
                }
            }
            Some(MessageType::Exception) => core.stats.response_exception.inc(),
            _ => core.stats.response_invalid_type.inc(),
        }

        Ok(FilterStatus::Continue)
    }
}

impl DecoderCallbacks for ResponseSink<'_> {
    fn new_decoder_event_handler(&mut self) -> Result<(), DecodeError> { Ok(()) }

    fn message_begin(&mut self, mut metadata: MessageMetadata) -> Result<FilterStatus, DecodeError> {
        // The client must see the sequence id it sent, whatever the
        // upstream observed.
        metadata.set_sequence_id(self.ctx.original_sequence_id);
        *self.first_reply_field = metadata.message_type() == Some(MessageType::Reply);

        let message_type =
            metadata.message_type().expect("reply envelope without a message type");
        self.ctx.core.protocol.write_message_begin(
            self.ctx.response_buffer,
            metadata.method_name().unwrap_or(""),
            message_type,
            self.ctx.original_sequence_id,
        );
        *self.metadata = Some(metadata);
        Ok(FilterStatus::Continue)
    }

    fn event(&mut self, event: DecoderEvent) -> Result<FilterStatus, DecodeError> {
        if let DecoderEvent::TransportEnd = event {
            return self.transport_end();
        }

        if let DecoderEvent::FieldBegin(_, field_type, field_id) = event {
            if *self.first_reply_field {
                // A reply struct sets exactly one field: id 0 is the call
                // result, anything else is a declared exception.
                *self.success = Some(field_id == 0 && field_type != FieldType::Stop);
                *self.first_reply_field = false;
            }
        }

        write_event(self.ctx.core.protocol.as_ref(), self.ctx.response_buffer, &event);
        Ok(FilterStatus::Continue)
    }
}
