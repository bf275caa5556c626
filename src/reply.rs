//! Locally synthesised replies.
//!
//! A [`DirectResponse`] is a message the proxy writes downstream without
//! consulting an upstream, typically an error. [`AppException`] is the
//! canonical implementation: a Thrift Exception message carrying a
//! `TApplicationException` struct.

use bytes::BytesMut;

use crate::{
    error::AppException,
    metadata::{FieldType, MessageMetadata, MessageType},
    protocol::Protocol,
};

/// A response the proxy can synthesise on its own.
pub trait DirectResponse: Send {
    /// Encode this response's message into `buffer` with `protocol`,
    /// borrowing the envelope identity (method name, sequence id) from
    /// `metadata`.
    fn encode(&self, metadata: &MessageMetadata, protocol: &dyn Protocol, buffer: &mut BytesMut);
}

impl DirectResponse for AppException {
    fn encode(&self, metadata: &MessageMetadata, protocol: &dyn Protocol, buffer: &mut BytesMut) {
        let method_name = metadata.method_name().unwrap_or("");
        let sequence_id = metadata.sequence_id().unwrap_or(0);
        protocol.write_message_begin(buffer, method_name, MessageType::Exception, sequence_id);
        protocol.write_struct_begin(buffer, "");
        protocol.write_field_begin(buffer, "message", FieldType::String, 1);
        protocol.write_string(buffer, self.message.as_bytes());
        protocol.write_field_end(buffer);
        protocol.write_field_begin(buffer, "type", FieldType::I32, 2);
        protocol.write_i32(buffer, self.kind as i32);
        protocol.write_field_end(buffer);
        protocol.write_field_begin(buffer, "", FieldType::Stop, 0);
        protocol.write_struct_end(buffer);
        protocol.write_message_end(buffer);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;

    use super::*;
    use crate::{error::AppExceptionType, protocol::BinaryProtocol};

    #[test]
    fn app_exception_encodes_a_decodable_exception_message() {
        let mut metadata = MessageMetadata::new();
        metadata.set_method_name("ping");
        metadata.set_sequence_id(7);

        let mut buffer = BytesMut::new();
        AppException::new(AppExceptionType::ProtocolError, "boom").encode(
            &metadata,
            &BinaryProtocol,
            &mut buffer,
        );

        let mut protocol = BinaryProtocol;
        let envelope = protocol
            .read_message_begin(&mut buffer)
            .expect("decode")
            .expect("complete envelope");
        assert_eq!(envelope.message_type(), Some(MessageType::Exception));
        assert_eq!(envelope.method_name(), Some("ping"));
        assert_eq!(envelope.sequence_id(), Some(7));

        let first = protocol
            .read_field_begin(&mut buffer)
            .expect("decode")
            .expect("field header");
        assert_eq!(first.field_type, FieldType::String);
        assert_eq!(first.field_id, 1);
        let message = protocol
            .read_string(&mut buffer)
            .expect("decode")
            .expect("message value");
        assert_eq!(&message[..], b"boom");

        let second = protocol
            .read_field_begin(&mut buffer)
            .expect("decode")
            .expect("field header");
        assert_eq!(second.field_type, FieldType::I32);
        assert_eq!(second.field_id, 2);
        let code = protocol
            .read_i32(&mut buffer)
            .expect("decode")
            .expect("type value");
        assert_eq!(code, AppExceptionType::ProtocolError as i32);

        let stop = protocol
            .read_field_begin(&mut buffer)
            .expect("decode")
            .expect("stop header");
        assert_eq!(stop.field_type, FieldType::Stop);
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn absent_identity_defaults_to_empty_method_and_zero_sequence() {
        let mut buffer = BytesMut::new();
        AppException::new(AppExceptionType::Unknown, "x").encode(
            &MessageMetadata::new(),
            &BinaryProtocol,
            &mut buffer,
        );
        let envelope = BinaryProtocol
            .read_message_begin(&mut buffer)
            .expect("decode")
            .expect("complete envelope");
        assert_eq!(envelope.method_name(), Some(""));
        assert_eq!(envelope.sequence_id(), Some(0));
    }
}
