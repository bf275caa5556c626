//! Thrift protocol codecs: the inner layer encoding message envelopes,
//! structs, fields and primitive values.
//!
//! A [`Protocol`] exposes the full read and write surface the decoder and
//! the response re-framing path need. Incremental reads follow the
//! `Result<Option<_>>` convention: `Ok(None)` means more bytes are needed
//! and nothing has been consumed.

use bytes::{Bytes, BytesMut};

use crate::{
    decoder::{DecoderEvent, FilterStatus},
    error::DecodeError,
    metadata::{FieldType, MessageMetadata, MessageType},
    reply::DirectResponse,
};

pub mod binary;

pub use binary::BinaryProtocol;

/// Selector for the supported protocol codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolType {
    /// Strict binary protocol (version word `0x8001`).
    Binary,
}

impl ProtocolType {
    /// The protocol name as used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
        }
    }
}

/// Build a protocol codec of the given concrete type.
#[must_use]
pub fn new_protocol(protocol_type: ProtocolType) -> Box<dyn Protocol> {
    match protocol_type {
        ProtocolType::Binary => Box::new(BinaryProtocol::default()),
    }
}

/// A decoded field header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldHeader {
    /// Field name; empty for protocols that do not encode names.
    pub name: String,
    /// The field's value type. [`FieldType::Stop`] terminates a struct.
    pub field_type: FieldType,
    /// The field id; 0 for a stop field.
    pub field_id: i16,
}

/// A decoded map header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapHeader {
    /// Key value type.
    pub key_type: FieldType,
    /// Mapped value type.
    pub value_type: FieldType,
    /// Number of key/value pairs.
    pub size: u32,
}

/// A decoded list or set header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListHeader {
    /// Element value type.
    pub elem_type: FieldType,
    /// Number of elements.
    pub size: u32,
}

/// Consumes the body of an in-band protocol upgrade request and builds the
/// matching upgrade response.
///
/// Produced by [`Protocol::upgrade_request_decoder`] when a message is
/// flagged as a protocol upgrade; the connection manager redirects all
/// message body events into it instead of the filter chain.
pub trait UpgradeHandler: Send {
    /// Observe the upgrade request envelope.
    fn message_begin(&mut self, metadata: &MessageMetadata) -> FilterStatus;

    /// Observe an upgrade request body event.
    fn event(&mut self, event: &DecoderEvent) -> FilterStatus;

    /// Build the upgrade response to send as a local reply once the
    /// request has been fully consumed.
    fn upgrade_response(&self) -> Box<dyn DirectResponse>;
}

/// Inner codec for Thrift message envelopes, structs, fields, containers
/// and primitives.
#[allow(clippy::missing_errors_doc)]
pub trait Protocol: Send {
    /// The concrete type of this protocol.
    fn protocol_type(&self) -> ProtocolType;

    /// Whether this protocol supports in-band protocol upgrades.
    fn supports_upgrade(&self) -> bool { false }

    /// A decoder for an upgrade request body, for protocols that
    /// advertise upgrade support.
    fn upgrade_request_decoder(&self) -> Option<Box<dyn UpgradeHandler>> { None }

    /// Read a message envelope, populating type, sequence id, method name
    /// and the upgrade flag.
    fn read_message_begin(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<MessageMetadata>, DecodeError>;

    /// Read the end of a message.
    fn read_message_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read the start of a struct, returning its name where encoded.
    fn read_struct_begin(&mut self, buffer: &mut BytesMut) -> Result<Option<String>, DecodeError>;

    /// Read the end of a struct.
    fn read_struct_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read a field header. A [`FieldType::Stop`] header ends the
    /// enclosing struct.
    fn read_field_begin(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<FieldHeader>, DecodeError>;

    /// Read the end of a field.
    fn read_field_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read a map header.
    fn read_map_begin(&mut self, buffer: &mut BytesMut) -> Result<Option<MapHeader>, DecodeError>;

    /// Read the end of a map.
    fn read_map_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read a list header.
    fn read_list_begin(&mut self, buffer: &mut BytesMut)
        -> Result<Option<ListHeader>, DecodeError>;

    /// Read the end of a list.
    fn read_list_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read a set header.
    fn read_set_begin(&mut self, buffer: &mut BytesMut)
        -> Result<Option<ListHeader>, DecodeError>;

    /// Read the end of a set.
    fn read_set_end(&mut self, buffer: &mut BytesMut) -> Result<Option<()>, DecodeError>;

    /// Read a boolean value.
    fn read_bool(&mut self, buffer: &mut BytesMut) -> Result<Option<bool>, DecodeError>;

    /// Read a byte value.
    fn read_byte(&mut self, buffer: &mut BytesMut) -> Result<Option<i8>, DecodeError>;

    /// Read a 16-bit integer value.
    fn read_i16(&mut self, buffer: &mut BytesMut) -> Result<Option<i16>, DecodeError>;

    /// Read a 32-bit integer value.
    fn read_i32(&mut self, buffer: &mut BytesMut) -> Result<Option<i32>, DecodeError>;

    /// Read a 64-bit integer value.
    fn read_i64(&mut self, buffer: &mut BytesMut) -> Result<Option<i64>, DecodeError>;

    /// Read a double value.
    fn read_double(&mut self, buffer: &mut BytesMut) -> Result<Option<f64>, DecodeError>;

    /// Read a string or binary value as raw bytes. Values are not assumed
    /// to be UTF-8.
    fn read_string(&mut self, buffer: &mut BytesMut) -> Result<Option<Bytes>, DecodeError>;

    /// Write a message envelope.
    fn write_message_begin(
        &self,
        buffer: &mut BytesMut,
        method_name: &str,
        message_type: MessageType,
        sequence_id: i32,
    );

    /// Write the end of a message.
    fn write_message_end(&self, buffer: &mut BytesMut);

    /// Write the start of a struct.
    fn write_struct_begin(&self, buffer: &mut BytesMut, name: &str);

    /// Write the end of a struct.
    fn write_struct_end(&self, buffer: &mut BytesMut);

    /// Write a field header. A [`FieldType::Stop`] header writes the
    /// struct terminator and ignores the field id.
    fn write_field_begin(
        &self,
        buffer: &mut BytesMut,
        name: &str,
        field_type: FieldType,
        field_id: i16,
    );

    /// Write the end of a field.
    fn write_field_end(&self, buffer: &mut BytesMut);

    /// Write a map header.
    fn write_map_begin(
        &self,
        buffer: &mut BytesMut,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    );

    /// Write the end of a map.
    fn write_map_end(&self, buffer: &mut BytesMut);

    /// Write a list header.
    fn write_list_begin(&self, buffer: &mut BytesMut, elem_type: FieldType, size: u32);

    /// Write the end of a list.
    fn write_list_end(&self, buffer: &mut BytesMut);

    /// Write a set header.
    fn write_set_begin(&self, buffer: &mut BytesMut, elem_type: FieldType, size: u32);

    /// Write the end of a set.
    fn write_set_end(&self, buffer: &mut BytesMut);

    /// Write a boolean value.
    fn write_bool(&self, buffer: &mut BytesMut, value: bool);

    /// Write a byte value.
    fn write_byte(&self, buffer: &mut BytesMut, value: i8);

    /// Write a 16-bit integer value.
    fn write_i16(&self, buffer: &mut BytesMut, value: i16);

    /// Write a 32-bit integer value.
    fn write_i32(&self, buffer: &mut BytesMut, value: i32);

    /// Write a 64-bit integer value.
    fn write_i64(&self, buffer: &mut BytesMut, value: i64);

    /// Write a double value.
    fn write_double(&self, buffer: &mut BytesMut, value: f64);

    /// Write a string or binary value from raw bytes.
    fn write_string(&self, buffer: &mut BytesMut, value: &[u8]);
}

/// Re-encode a decoder event through `protocol` into `buffer`.
///
/// This is the response path's conversion primitive: events decoded with
/// the upstream's protocol are replayed through the downstream protocol's
/// write surface. Transport boundary events carry no payload and are
/// ignored; the message envelope is written by the caller, which owns the
/// rewritten metadata.
pub fn write_event(protocol: &dyn Protocol, buffer: &mut BytesMut, event: &DecoderEvent) {
    match event {
        DecoderEvent::TransportBegin | DecoderEvent::TransportEnd => {}
        DecoderEvent::StructBegin(name) => protocol.write_struct_begin(buffer, name),
        DecoderEvent::StructEnd => {
            protocol.write_field_begin(buffer, "", FieldType::Stop, 0);
            protocol.write_struct_end(buffer);
        }
        DecoderEvent::FieldBegin(name, field_type, field_id) => {
            protocol.write_field_begin(buffer, name, *field_type, *field_id);
        }
        DecoderEvent::FieldEnd => protocol.write_field_end(buffer),
        DecoderEvent::MapBegin(key_type, value_type, size) => {
            protocol.write_map_begin(buffer, *key_type, *value_type, *size);
        }
        DecoderEvent::MapEnd => protocol.write_map_end(buffer),
        DecoderEvent::ListBegin(elem_type, size) => {
            protocol.write_list_begin(buffer, *elem_type, *size);
        }
        DecoderEvent::ListEnd => protocol.write_list_end(buffer),
        DecoderEvent::SetBegin(elem_type, size) => {
            protocol.write_set_begin(buffer, *elem_type, *size);
        }
        DecoderEvent::SetEnd => protocol.write_set_end(buffer),
        DecoderEvent::Bool(value) => protocol.write_bool(buffer, *value),
        DecoderEvent::Byte(value) => protocol.write_byte(buffer, *value),
        DecoderEvent::Int16(value) => protocol.write_i16(buffer, *value),
        DecoderEvent::Int32(value) => protocol.write_i32(buffer, *value),
        DecoderEvent::Int64(value) => protocol.write_i64(buffer, *value),
        DecoderEvent::Double(value) => protocol.write_double(buffer, *value),
        DecoderEvent::String(value) => protocol.write_string(buffer, value),
        DecoderEvent::MessageEnd => protocol.write_message_end(buffer),
    }
}
