//! Message envelope metadata shared between the decoder, the connection
//! manager and the response path.

use crate::protocol::ProtocolType;

/// Thrift message types from the message envelope.
///
/// Only these four types exist on the wire; a type byte outside the range
/// is a protocol error. A syntactically valid type arriving in the wrong
/// direction (a `Reply` as a request, a `Call` as a response) is counted
/// as invalid but still dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// A request expecting a response.
    Call,
    /// A response to a `Call`.
    Reply,
    /// An application exception response.
    Exception,
    /// A request that forbids a response.
    Oneway,
}

impl MessageType {
    /// Decode a wire type byte, `None` for out-of-range values.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Exception),
            4 => Some(Self::Oneway),
            _ => None,
        }
    }

    /// The wire representation of this message type.
    #[must_use]
    pub fn as_wire(self) -> u8 {
        match self {
            Self::Call => 1,
            Self::Reply => 2,
            Self::Exception => 3,
            Self::Oneway => 4,
        }
    }
}

/// Thrift field value types (TType).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Stop,
    Void,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl FieldType {
    /// Decode a wire type byte, `None` for unknown values.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stop),
            1 => Some(Self::Void),
            2 => Some(Self::Bool),
            3 => Some(Self::Byte),
            4 => Some(Self::Double),
            6 => Some(Self::I16),
            8 => Some(Self::I32),
            10 => Some(Self::I64),
            11 => Some(Self::String),
            12 => Some(Self::Struct),
            13 => Some(Self::Map),
            14 => Some(Self::Set),
            15 => Some(Self::List),
            _ => None,
        }
    }

    /// The wire representation of this field type.
    #[must_use]
    pub fn as_wire(self) -> u8 {
        match self {
            Self::Stop => 0,
            Self::Void => 1,
            Self::Bool => 2,
            Self::Byte => 3,
            Self::Double => 4,
            Self::I16 => 6,
            Self::I32 => 8,
            Self::I64 => 10,
            Self::String => 11,
            Self::Struct => 12,
            Self::Map => 13,
            Self::Set => 14,
            Self::List => 15,
        }
    }
}

/// Metadata associated with one Thrift message.
///
/// Attributes are individually present or absent; the decoder populates
/// them as the envelope is parsed. The sequence id and protocol tag are
/// mutable because the response path rewrites both.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageMetadata {
    message_type: Option<MessageType>,
    sequence_id: Option<i32>,
    method_name: Option<String>,
    protocol: Option<ProtocolType>,
    protocol_upgrade: bool,
}

impl MessageMetadata {
    /// Create metadata with no attributes set.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The message type, if parsed.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> { self.message_type }

    /// Set the message type.
    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = Some(message_type);
    }

    /// The sequence id, if parsed.
    #[must_use]
    pub fn sequence_id(&self) -> Option<i32> { self.sequence_id }

    /// Set the sequence id.
    pub fn set_sequence_id(&mut self, sequence_id: i32) { self.sequence_id = Some(sequence_id); }

    /// The method name, if parsed.
    #[must_use]
    pub fn method_name(&self) -> Option<&str> { self.method_name.as_deref() }

    /// Set the method name.
    pub fn set_method_name(&mut self, method_name: impl Into<String>) {
        self.method_name = Some(method_name.into());
    }

    /// The protocol that produced (or will frame) this message.
    #[must_use]
    pub fn protocol(&self) -> Option<ProtocolType> { self.protocol }

    /// Set the protocol tag.
    pub fn set_protocol(&mut self, protocol: ProtocolType) { self.protocol = Some(protocol); }

    /// Whether this message is an in-band protocol upgrade request.
    #[must_use]
    pub fn is_protocol_upgrade(&self) -> bool { self.protocol_upgrade }

    /// Flag this message as a protocol upgrade request.
    pub fn set_protocol_upgrade(&mut self, upgrade: bool) { self.protocol_upgrade = upgrade; }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, Some(MessageType::Call))]
    #[case(2, Some(MessageType::Reply))]
    #[case(3, Some(MessageType::Exception))]
    #[case(4, Some(MessageType::Oneway))]
    #[case(0, None)]
    #[case(5, None)]
    fn message_type_wire_mapping(#[case] wire: u8, #[case] expected: Option<MessageType>) {
        assert_eq!(MessageType::from_wire(wire), expected);
        if let Some(message_type) = expected {
            assert_eq!(message_type.as_wire(), wire);
        }
    }

    #[rstest]
    #[case(5)]
    #[case(7)]
    #[case(9)]
    #[case(16)]
    fn field_type_rejects_unassigned_bytes(#[case] wire: u8) {
        assert_eq!(FieldType::from_wire(wire), None);
    }

    #[test]
    fn field_type_round_trips_assigned_bytes() {
        for wire in 0..=15u8 {
            if let Some(field_type) = FieldType::from_wire(wire) {
                assert_eq!(field_type.as_wire(), wire);
            }
        }
    }

    #[test]
    fn attributes_start_absent() {
        let metadata = MessageMetadata::new();
        assert_eq!(metadata.message_type(), None);
        assert_eq!(metadata.sequence_id(), None);
        assert_eq!(metadata.method_name(), None);
        assert_eq!(metadata.protocol(), None);
        assert!(!metadata.is_protocol_upgrade());
    }

    #[test]
    fn sequence_id_is_rewritable() {
        let mut metadata = MessageMetadata::new();
        metadata.set_sequence_id(99);
        metadata.set_sequence_id(7);
        assert_eq!(metadata.sequence_id(), Some(7));
    }
}
