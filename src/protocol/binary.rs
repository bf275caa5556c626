//! Strict Thrift binary protocol.
//!
//! Message envelopes carry the version word `0x8001` in the top half of
//! the leading i32 and the message type in its low byte. Struct, field
//! and message ends consume no bytes, so incremental decoding only ever
//! underflows on headers and values.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{FieldHeader, ListHeader, MapHeader, Protocol, ProtocolType};
use crate::{
    error::{DecodeError, ProtocolError},
    metadata::{FieldType, MessageMetadata, MessageType},
};

/// Strict binary version marker.
const VERSION: u16 = 0x8001;

/// Strict binary protocol codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryProtocol;

impl BinaryProtocol {
    fn read_exact<const N: usize>(buffer: &mut BytesMut) -> Option<[u8; N]> {
        if buffer.len() < N {
            return None;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buffer[..N]);
        buffer.advance(N);
        Some(bytes)
    }
}

impl Protocol for BinaryProtocol {
    fn protocol_type(&self) -> ProtocolType { ProtocolType::Binary }

    fn read_message_begin(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<MessageMetadata>, DecodeError> {
        if buffer.len() < 8 {
            return Ok(None);
        }
        let version = u16::from_be_bytes([buffer[0], buffer[1]]);
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion { version }.into());
        }
        let type_byte = buffer[3];
        let message_type = MessageType::from_wire(type_byte)
            .ok_or(ProtocolError::UnknownMessageType(type_byte))?;
        let name_len = i32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
        if name_len < 0 {
            return Err(ProtocolError::InvalidLength(name_len).into());
        }
        let name_len = name_len as usize;
        if buffer.len() < 8 + name_len + 4 {
            return Ok(None);
        }

        buffer.advance(8);
        let name = buffer.split_to(name_len);
        let sequence_id = buffer.get_i32();

        let mut metadata = MessageMetadata::new();
        metadata.set_message_type(message_type);
        metadata.set_method_name(String::from_utf8_lossy(&name).into_owned());
        metadata.set_sequence_id(sequence_id);
        metadata.set_protocol(ProtocolType::Binary);
        Ok(Some(metadata))
    }

    fn read_message_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_struct_begin(&mut self, _buffer: &mut BytesMut) -> Result<Option<String>, DecodeError> {
        Ok(Some(String::new()))
    }

    fn read_struct_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_field_begin(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<FieldHeader>, DecodeError> {
        let Some(&type_byte) = buffer.first() else {
            return Ok(None);
        };
        let field_type =
            FieldType::from_wire(type_byte).ok_or(ProtocolError::UnknownFieldType(type_byte))?;
        if field_type == FieldType::Stop {
            buffer.advance(1);
            return Ok(Some(FieldHeader {
                name: String::new(),
                field_type: FieldType::Stop,
                field_id: 0,
            }));
        }
        if buffer.len() < 3 {
            return Ok(None);
        }
        buffer.advance(1);
        let field_id = buffer.get_i16();
        Ok(Some(FieldHeader {
            name: String::new(),
            field_type,
            field_id,
        }))
    }

    fn read_field_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_map_begin(&mut self, buffer: &mut BytesMut) -> Result<Option<MapHeader>, DecodeError> {
        if buffer.len() < 6 {
            return Ok(None);
        }
        let key_byte = buffer[0];
        let value_byte = buffer[1];
        let key_type =
            FieldType::from_wire(key_byte).ok_or(ProtocolError::UnknownFieldType(key_byte))?;
        let value_type =
            FieldType::from_wire(value_byte).ok_or(ProtocolError::UnknownFieldType(value_byte))?;
        let size = i32::from_be_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]);
        if size < 0 {
            return Err(ProtocolError::InvalidContainerSize(size).into());
        }
        buffer.advance(6);
        Ok(Some(MapHeader {
            key_type,
            value_type,
            size: size as u32,
        }))
    }

    fn read_map_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_list_begin(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<ListHeader>, DecodeError> {
        if buffer.len() < 5 {
            return Ok(None);
        }
        let elem_byte = buffer[0];
        let elem_type =
            FieldType::from_wire(elem_byte).ok_or(ProtocolError::UnknownFieldType(elem_byte))?;
        let size = i32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]);
        if size < 0 {
            return Err(ProtocolError::InvalidContainerSize(size).into());
        }
        buffer.advance(5);
        Ok(Some(ListHeader {
            elem_type,
            size: size as u32,
        }))
    }

    fn read_list_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_set_begin(&mut self, buffer: &mut BytesMut) -> Result<Option<ListHeader>, DecodeError> {
        self.read_list_begin(buffer)
    }

    fn read_set_end(&mut self, _buffer: &mut BytesMut) -> Result<Option<()>, DecodeError> {
        Ok(Some(()))
    }

    fn read_bool(&mut self, buffer: &mut BytesMut) -> Result<Option<bool>, DecodeError> {
        Ok(Self::read_exact::<1>(buffer).map(|[b]| b != 0))
    }

    fn read_byte(&mut self, buffer: &mut BytesMut) -> Result<Option<i8>, DecodeError> {
        Ok(Self::read_exact::<1>(buffer).map(|[b]| b as i8))
    }

    fn read_i16(&mut self, buffer: &mut BytesMut) -> Result<Option<i16>, DecodeError> {
        Ok(Self::read_exact::<2>(buffer).map(i16::from_be_bytes))
    }

    fn read_i32(&mut self, buffer: &mut BytesMut) -> Result<Option<i32>, DecodeError> {
        Ok(Self::read_exact::<4>(buffer).map(i32::from_be_bytes))
    }

    fn read_i64(&mut self, buffer: &mut BytesMut) -> Result<Option<i64>, DecodeError> {
        Ok(Self::read_exact::<8>(buffer).map(i64::from_be_bytes))
    }

    fn read_double(&mut self, buffer: &mut BytesMut) -> Result<Option<f64>, DecodeError> {
        Ok(Self::read_exact::<8>(buffer).map(|bytes| f64::from_bits(u64::from_be_bytes(bytes))))
    }

    fn read_string(&mut self, buffer: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        if buffer.len() < 4 {
            return Ok(None);
        }
        let len = i32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        if len < 0 {
            return Err(ProtocolError::InvalidLength(len).into());
        }
        let len = len as usize;
        if buffer.len() < 4 + len {
            return Ok(None);
        }
        buffer.advance(4);
        Ok(Some(buffer.split_to(len).freeze()))
    }

    fn write_message_begin(
        &self,
        buffer: &mut BytesMut,
        method_name: &str,
        message_type: MessageType,
        sequence_id: i32,
    ) {
        buffer.put_u16(VERSION);
        buffer.put_u8(0);
        buffer.put_u8(message_type.as_wire());
        buffer.put_i32(method_name.len() as i32);
        buffer.put_slice(method_name.as_bytes());
        buffer.put_i32(sequence_id);
    }

    fn write_message_end(&self, _buffer: &mut BytesMut) {}

    fn write_struct_begin(&self, _buffer: &mut BytesMut, _name: &str) {}

    fn write_struct_end(&self, _buffer: &mut BytesMut) {}

    fn write_field_begin(
        &self,
        buffer: &mut BytesMut,
        _name: &str,
        field_type: FieldType,
        field_id: i16,
    ) {
        buffer.put_u8(field_type.as_wire());
        if field_type != FieldType::Stop {
            buffer.put_i16(field_id);
        }
    }

    fn write_field_end(&self, _buffer: &mut BytesMut) {}

    fn write_map_begin(
        &self,
        buffer: &mut BytesMut,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    ) {
        buffer.put_u8(key_type.as_wire());
        buffer.put_u8(value_type.as_wire());
        buffer.put_i32(size as i32);
    }

    fn write_map_end(&self, _buffer: &mut BytesMut) {}

    fn write_list_begin(&self, buffer: &mut BytesMut, elem_type: FieldType, size: u32) {
        buffer.put_u8(elem_type.as_wire());
        buffer.put_i32(size as i32);
    }

    fn write_list_end(&self, _buffer: &mut BytesMut) {}

    fn write_set_begin(&self, buffer: &mut BytesMut, elem_type: FieldType, size: u32) {
        self.write_list_begin(buffer, elem_type, size);
    }

    fn write_set_end(&self, _buffer: &mut BytesMut) {}

    fn write_bool(&self, buffer: &mut BytesMut, value: bool) {
        buffer.put_u8(u8::from(value));
    }

    fn write_byte(&self, buffer: &mut BytesMut, value: i8) { buffer.put_i8(value); }

    fn write_i16(&self, buffer: &mut BytesMut, value: i16) { buffer.put_i16(value); }

    fn write_i32(&self, buffer: &mut BytesMut, value: i32) { buffer.put_i32(value); }

    fn write_i64(&self, buffer: &mut BytesMut, value: i64) { buffer.put_i64(value); }

    fn write_double(&self, buffer: &mut BytesMut, value: f64) {
        buffer.put_u64(value.to_bits());
    }

    fn write_string(&self, buffer: &mut BytesMut, value: &[u8]) {
        buffer.put_i32(value.len() as i32);
        buffer.put_slice(value);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn protocol() -> BinaryProtocol { BinaryProtocol }

    #[test]
    fn message_begin_underflows_until_envelope_is_complete() {
        let mut encoded = BytesMut::new();
        protocol().write_message_begin(&mut encoded, "ping", MessageType::Call, 7);
        for take in 0..encoded.len() {
            let mut partial = BytesMut::from(&encoded[..take]);
            assert_eq!(
                protocol().read_message_begin(&mut partial).expect("decode"),
                None,
                "{take} bytes must underflow",
            );
            assert_eq!(partial.len(), take, "underflow must not consume");
        }
    }

    #[test]
    fn message_begin_round_trips_envelope() {
        let mut encoded = BytesMut::new();
        protocol().write_message_begin(&mut encoded, "ping", MessageType::Oneway, -3);
        let metadata = protocol()
            .read_message_begin(&mut encoded)
            .expect("decode")
            .expect("complete");
        assert_eq!(metadata.method_name(), Some("ping"));
        assert_eq!(metadata.message_type(), Some(MessageType::Oneway));
        assert_eq!(metadata.sequence_id(), Some(-3));
        assert_eq!(metadata.protocol(), Some(ProtocolType::Binary));
        assert!(encoded.is_empty());
    }

    #[test]
    fn message_begin_rejects_bad_version() {
        let mut buffer = BytesMut::from(&[0x00u8, 0x01, 0, 1, 0, 0, 0, 0][..]);
        let err = protocol().read_message_begin(&mut buffer).expect_err("reject");
        assert_eq!(err, ProtocolError::UnsupportedVersion { version: 0x0001 }.into());
    }

    #[test]
    fn message_begin_rejects_unknown_type_byte() {
        let mut buffer = BytesMut::from(&[0x80u8, 0x01, 0, 9, 0, 0, 0, 0][..]);
        let err = protocol().read_message_begin(&mut buffer).expect_err("reject");
        assert_eq!(err, ProtocolError::UnknownMessageType(9).into());
    }

    #[test]
    fn field_begin_stop_consumes_one_byte() {
        let mut buffer = BytesMut::from(&[0u8, 0xff][..]);
        let header = protocol()
            .read_field_begin(&mut buffer)
            .expect("decode")
            .expect("complete");
        assert_eq!(header.field_type, FieldType::Stop);
        assert_eq!(header.field_id, 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn field_begin_underflows_without_consuming() {
        let mut buffer = BytesMut::from(&[FieldType::Bool.as_wire(), 0][..]);
        assert_eq!(protocol().read_field_begin(&mut buffer).expect("decode"), None);
        assert_eq!(buffer.len(), 2);
    }

    #[rstest]
    #[case::negative_string(&[0xffu8, 0xff, 0xff, 0xff][..])]
    fn string_rejects_negative_length(#[case] bytes: &[u8]) {
        let mut buffer = BytesMut::from(bytes);
        let err = protocol().read_string(&mut buffer).expect_err("reject");
        assert_eq!(err, ProtocolError::InvalidLength(-1).into());
    }

    #[test]
    fn string_preserves_non_utf8_bytes() {
        let mut buffer = BytesMut::new();
        protocol().write_string(&mut buffer, &[0xff, 0xfe, 0x00]);
        let value = protocol()
            .read_string(&mut buffer)
            .expect("decode")
            .expect("complete");
        assert_eq!(&value[..], &[0xff, 0xfe, 0x00]);
    }

    #[test]
    fn map_begin_rejects_negative_size() {
        let mut buffer = BytesMut::new();
        buffer.put_u8(FieldType::I32.as_wire());
        buffer.put_u8(FieldType::I32.as_wire());
        buffer.put_i32(-2);
        let err = protocol().read_map_begin(&mut buffer).expect_err("reject");
        assert_eq!(err, ProtocolError::InvalidContainerSize(-2).into());
    }

    #[test]
    fn double_round_trips_bit_patterns() {
        let mut buffer = BytesMut::new();
        protocol().write_double(&mut buffer, -0.5);
        let value = protocol()
            .read_double(&mut buffer)
            .expect("decode")
            .expect("complete");
        assert_eq!(value, -0.5);
    }
}
