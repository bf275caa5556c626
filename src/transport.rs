//! Thrift transport codecs: the outer framing layer around message
//! payloads.
//!
//! A [`Transport`] splits the byte stream into frames for the decoder and
//! wraps encoded payloads for transmission. Incremental decoding follows
//! the `Result<Option<_>>` convention: `Ok(None)` means more bytes are
//! needed and nothing has been consumed.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    error::{DecodeError, TransportError},
    metadata::MessageMetadata,
};

/// Maximum frame length in bytes (16 MiB).
///
/// Frame lengths passed to transport constructors are clamped to at most
/// this value to prevent unbounded memory allocation.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Selector for the supported transport codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportType {
    /// Four-byte big-endian length prefix per message.
    Framed,
    /// No framing; message boundaries come from the protocol.
    Unframed,
}

impl TransportType {
    /// The transport name as used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Framed => "framed",
            Self::Unframed => "unframed",
        }
    }
}

/// Build a transport codec of the given concrete type.
#[must_use]
pub fn new_transport(transport_type: TransportType) -> Box<dyn Transport> {
    match transport_type {
        TransportType::Framed => Box::new(FramedTransport::default()),
        TransportType::Unframed => Box::new(UnframedTransport),
    }
}

/// Result of successfully decoding a frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStart {
    /// Payload size declared by the header, if the transport declares one.
    pub size: Option<u32>,
}

/// Outer framing codec for Thrift messages.
pub trait Transport: Send {
    /// The concrete type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Attempt to decode a frame header from `buffer`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; no bytes are
    /// consumed in that case.
    ///
    /// # Errors
    /// Returns an error for malformed or oversized frame headers.
    fn decode_frame_start(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<FrameStart>, DecodeError>;

    /// Consume any trailing frame material after the message body.
    ///
    /// # Errors
    /// Returns an error if the frame trailer is malformed.
    fn decode_frame_end(&mut self, buffer: &mut BytesMut) -> Result<(), DecodeError>;

    /// Frame `payload` into `dst` for the message described by `metadata`.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be framed (for example,
    /// exceeding the maximum frame size).
    fn encode_frame(
        &mut self,
        dst: &mut BytesMut,
        metadata: &MessageMetadata,
        payload: BytesMut,
    ) -> Result<(), DecodeError>;
}

/// Framed transport: each message is preceded by a 4-byte big-endian
/// payload length.
#[derive(Clone, Copy, Debug)]
pub struct FramedTransport {
    max_frame_length: usize,
}

impl FramedTransport {
    /// Construct a framed transport with a maximum frame length, clamped
    /// to [`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(MAX_FRAME_LENGTH),
        }
    }

    /// The maximum payload length this transport will accept.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for FramedTransport {
    fn default() -> Self { Self::new(MAX_FRAME_LENGTH) }
}

impl Transport for FramedTransport {
    fn transport_type(&self) -> TransportType { TransportType::Framed }

    fn decode_frame_start(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<FrameStart>, DecodeError> {
        if buffer.len() < 4 {
            return Ok(None);
        }
        let size = i32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        if size <= 0 {
            return Err(TransportError::InvalidFrameSize(size).into());
        }
        let size = size as u32;
        if size as usize > self.max_frame_length {
            return Err(TransportError::OversizedFrame {
                size: size as usize,
                max: self.max_frame_length,
            }
            .into());
        }
        buffer.advance(4);
        Ok(Some(FrameStart { size: Some(size) }))
    }

    fn decode_frame_end(&mut self, _buffer: &mut BytesMut) -> Result<(), DecodeError> { Ok(()) }

    fn encode_frame(
        &mut self,
        dst: &mut BytesMut,
        _metadata: &MessageMetadata,
        payload: BytesMut,
    ) -> Result<(), DecodeError> {
        if payload.len() > self.max_frame_length {
            return Err(TransportError::OversizedFrame {
                size: payload.len(),
                max: self.max_frame_length,
            }
            .into());
        }
        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put(payload);
        Ok(())
    }
}

/// Unframed transport: the byte stream is a bare sequence of messages and
/// frame boundaries degenerate to message boundaries.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnframedTransport;

impl Transport for UnframedTransport {
    fn transport_type(&self) -> TransportType { TransportType::Unframed }

    fn decode_frame_start(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<FrameStart>, DecodeError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(FrameStart { size: None }))
    }

    fn decode_frame_end(&mut self, _buffer: &mut BytesMut) -> Result<(), DecodeError> { Ok(()) }

    fn encode_frame(
        &mut self,
        dst: &mut BytesMut,
        _metadata: &MessageMetadata,
        payload: BytesMut,
    ) -> Result<(), DecodeError> {
        dst.put(payload);
        Ok(())
    }
}
