//! Error types for the decoding layers.
//!
//! The taxonomy mirrors how errors propagate through the connection
//! manager:
//!
//! - [`TransportError`]: wire-level framing failures (frame sizes, length
//!   accounting). Fatal to the connection.
//! - [`ProtocolError`]: failures inside a frame (bad version words, unknown
//!   type bytes, invalid lengths). Fatal to the connection.
//! - [`AppException`]: an application-level Thrift error. Encodable as an
//!   Exception reply; never closes the connection by itself.
//! - [`DecodeError`]: the union carried by decoder, transport and protocol
//!   signatures.

use thiserror::Error;

use crate::metadata::FieldType;

/// Framing-level errors from a transport codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Frame length prefix exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Size declared by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame length prefix is zero or negative.
    #[error("invalid frame size {0}")]
    InvalidFrameSize(i32),

    /// A message did not consume exactly its declared frame length.
    #[error("frame size mismatch: consumed {consumed} of {declared} declared bytes")]
    FrameSizeMismatch {
        /// Payload bytes actually consumed by the message.
        consumed: u64,
        /// Payload bytes declared by the frame header.
        declared: u64,
    },
}

/// Protocol-level errors from a message codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Version word did not match the protocol's expected marker.
    #[error("unsupported protocol version {version:#06x}")]
    UnsupportedVersion {
        /// The version marker that was rejected.
        version: u16,
    },

    /// Message type byte outside the defined range.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Field type byte outside the defined range.
    #[error("unknown field type: {0}")]
    UnknownFieldType(u8),

    /// Negative string or binary length.
    #[error("invalid length: {0}")]
    InvalidLength(i32),

    /// Negative container size.
    #[error("invalid container size: {0}")]
    InvalidContainerSize(i32),

    /// A field type that cannot appear in value position.
    #[error("field type {0:?} not permitted as a value")]
    UnexpectedValueType(FieldType),
}

/// Thrift `TApplicationException` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppExceptionType {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

/// An application-level Thrift error.
///
/// Unlike transport and protocol errors this is a well-formed outcome: it
/// can be encoded as an Exception message and returned to the downstream
/// client (see [`crate::reply`]).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct AppException {
    /// The exception code.
    pub kind: AppExceptionType,
    /// Human-readable error text, carried in the reply.
    pub message: String,
}

impl AppException {
    /// Create an exception with the given code and message.
    pub fn new(kind: AppExceptionType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Union of all decoding failures.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Application-level Thrift exception.
    #[error("application exception: {0}")]
    App(#[from] AppException),

    /// Wire-level transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// In-frame protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl DecodeError {
    /// The error category as a string, for logging.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::App(_) => "application",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = DecodeError::from(TransportError::OversizedFrame {
            size: 2000,
            max: 1024,
        });
        assert_eq!(err.to_string(), "transport error: frame exceeds max length: 2000 > 1024");
        assert_eq!(err.error_type(), "transport");
    }

    #[test]
    fn app_exception_carries_kind_and_message() {
        let ex = AppException::new(AppExceptionType::ProtocolError, "bad frame");
        assert_eq!(ex.kind, AppExceptionType::ProtocolError);
        assert_eq!(DecodeError::from(ex).error_type(), "application");
    }
}
