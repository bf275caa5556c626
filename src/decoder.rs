//! Incremental transport and protocol decoding.
//!
//! [`Decoder`] walks one Thrift message at a time, firing events into a
//! [`DecoderCallbacks`] sink. Decoding is resumable: an underflow or a
//! [`FilterStatus::StopIteration`] from the sink leaves the state machine
//! positioned after the last delivered event, so resumption never
//! redelivers.
//!
//! Event order for one message:
//!
//! `new_decoder_event_handler` → TransportBegin → `message_begin` →
//! body events (struct / field / container / primitive) → MessageEnd →
//! TransportEnd.

use bytes::{Bytes, BytesMut};

use crate::{
    error::{DecodeError, ProtocolError, TransportError},
    metadata::{FieldType, MessageMetadata},
    protocol::{Protocol, ProtocolType},
    transport::{Transport, TransportType},
};

/// Whether iteration over decoder events should proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// Deliver the next event.
    Continue,
    /// Pause decoding; the pauser resumes it later.
    StopIteration,
}

/// One decoded protocol token.
///
/// The message envelope travels through [`DecoderCallbacks::message_begin`]
/// instead of a variant because it transfers ownership of the metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum DecoderEvent {
    /// A message frame has started.
    TransportBegin,
    /// Start of a struct, with its name where the protocol encodes one.
    StructBegin(String),
    /// End of a struct.
    StructEnd,
    /// Start of a field: name, value type, field id.
    FieldBegin(String, FieldType, i16),
    /// End of a field.
    FieldEnd,
    /// Start of a map: key type, value type, entry count.
    MapBegin(FieldType, FieldType, u32),
    /// End of a map.
    MapEnd,
    /// Start of a list: element type, element count.
    ListBegin(FieldType, u32),
    /// End of a list.
    ListEnd,
    /// Start of a set: element type, element count.
    SetBegin(FieldType, u32),
    /// End of a set.
    SetEnd,
    /// A boolean value.
    Bool(bool),
    /// A byte value.
    Byte(i8),
    /// A 16-bit integer value.
    Int16(i16),
    /// A 32-bit integer value.
    Int32(i32),
    /// A 64-bit integer value.
    Int64(i64),
    /// A double value.
    Double(f64),
    /// A string or binary value, as raw bytes.
    String(Bytes),
    /// End of the message body.
    MessageEnd,
    /// The message frame is complete.
    TransportEnd,
}

/// Sink for decoder events.
pub trait DecoderCallbacks {
    /// A new message is starting; prepare an event handler for it.
    ///
    /// # Errors
    /// Implementations may fail while building the handler; the failure is
    /// treated as a decode error.
    fn new_decoder_event_handler(&mut self) -> Result<(), DecodeError>;

    /// The message envelope has been decoded.
    ///
    /// # Errors
    /// Handler failures propagate as decode errors.
    fn message_begin(&mut self, metadata: MessageMetadata) -> Result<FilterStatus, DecodeError>;

    /// A body or boundary event has been decoded.
    ///
    /// # Errors
    /// Handler failures propagate as decode errors.
    fn event(&mut self, event: DecoderEvent) -> Result<FilterStatus, DecodeError>;
}

/// Outcome of one [`Decoder::on_data`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// One complete message was decoded and delivered.
    Complete,
    /// More bytes are needed; state is preserved.
    Underflow,
    /// A handler returned [`FilterStatus::StopIteration`]; state is
    /// preserved past the delivered event.
    Stopped,
}

#[derive(Clone, Copy, Debug)]
enum MachineState {
    FrameStart,
    MessageBegin,
    Body,
    MessageEnd,
    FrameEnd,
}

/// Pending work inside a message body. The struct walk is encoded as an
/// explicit stack so decoding can pause at any token boundary.
#[derive(Clone, Copy, Debug)]
enum BodyTask {
    Value(FieldType),
    StructFields,
    FieldEnd,
    ListItems { elem: FieldType, remaining: u32 },
    SetItems { elem: FieldType, remaining: u32 },
    MapItems { key: FieldType, value: FieldType, remaining: u32, expect_key: bool },
}

/// Incremental decoder for one direction of a connection.
pub struct Decoder {
    transport: Box<dyn Transport>,
    protocol: Box<dyn Protocol>,
    state: MachineState,
    stack: Vec<BodyTask>,
    frame_size: Option<u64>,
    frame_consumed: u64,
}

impl Decoder {
    /// Create a decoder over the given transport and protocol.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, protocol: Box<dyn Protocol>) -> Self {
        Self {
            transport,
            protocol,
            state: MachineState::FrameStart,
            stack: Vec::new(),
            frame_size: None,
            frame_consumed: 0,
        }
    }

    /// The concrete type of the decoder's transport.
    #[must_use]
    pub fn transport_type(&self) -> TransportType { self.transport.transport_type() }

    /// The concrete type of the decoder's protocol.
    #[must_use]
    pub fn protocol_type(&self) -> ProtocolType { self.protocol.protocol_type() }

    /// Whether a message frame is currently mid-decode.
    #[must_use]
    pub fn frame_in_progress(&self) -> bool {
        !matches!(self.state, MachineState::FrameStart)
    }

    /// Decode at most one complete message from `buffer`, delivering
    /// events into `callbacks`.
    ///
    /// # Errors
    /// Transport, protocol and handler errors are fatal to the stream;
    /// the decoder must not be reused after an error.
    pub fn on_data(
        &mut self,
        buffer: &mut BytesMut,
        callbacks: &mut dyn DecoderCallbacks,
    ) -> Result<DecodeStatus, DecodeError> {
        macro_rules! deliver {
            ($event:expr) => {
                if callbacks.event($event)? == FilterStatus::StopIteration {
                    return Ok(DecodeStatus::Stopped);
                }
            };
        }

        loop {
            match self.state {
                MachineState::FrameStart => {
                    let Some(start) = self.transport.decode_frame_start(buffer)? else {
                        return Ok(DecodeStatus::Underflow);
                    };
                    self.frame_size = start.size.map(u64::from);
                    self.frame_consumed = 0;
                    self.state = MachineState::MessageBegin;
                    callbacks.new_decoder_event_handler()?;
                    deliver!(DecoderEvent::TransportBegin);
                }
                MachineState::MessageBegin => {
                    let Some(metadata) =
                        self.read_tracked(buffer, |p, b| p.read_message_begin(b))?
                    else {
                        return Ok(DecodeStatus::Underflow);
                    };
                    // The message body is the root args/result struct.
                    self.stack.clear();
                    self.stack.push(BodyTask::Value(FieldType::Struct));
                    self.state = MachineState::Body;
                    if callbacks.message_begin(metadata)? == FilterStatus::StopIteration {
                        return Ok(DecodeStatus::Stopped);
                    }
                }
                MachineState::Body => {
                    let Some(task) = self.stack.last().copied() else {
                        self.state = MachineState::MessageEnd;
                        continue;
                    };
                    match task {
                        BodyTask::Value(field_type) => match field_type {
                            FieldType::Bool => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_bool(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Bool(value));
                            }
                            FieldType::Byte => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_byte(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Byte(value));
                            }
                            FieldType::I16 => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_i16(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Int16(value));
                            }
                            FieldType::I32 => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_i32(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Int32(value));
                            }
                            FieldType::I64 => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_i64(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Int64(value));
                            }
                            FieldType::Double => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_double(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::Double(value));
                            }
                            FieldType::String => {
                                let Some(value) =
                                    self.read_tracked(buffer, |p, b| p.read_string(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                self.stack.pop();
                                deliver!(DecoderEvent::String(value));
                            }
                            FieldType::Struct => {
                                let Some(name) =
                                    self.read_tracked(buffer, |p, b| p.read_struct_begin(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                *self.stack.last_mut().expect("value task on stack") =
                                    BodyTask::StructFields;
                                deliver!(DecoderEvent::StructBegin(name));
                            }
                            FieldType::Map => {
                                let Some(header) =
                                    self.read_tracked(buffer, |p, b| p.read_map_begin(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                *self.stack.last_mut().expect("value task on stack") =
                                    BodyTask::MapItems {
                                        key: header.key_type,
                                        value: header.value_type,
                                        remaining: header.size,
                                        expect_key: true,
                                    };
                                deliver!(DecoderEvent::MapBegin(
                                    header.key_type,
                                    header.value_type,
                                    header.size,
                                ));
                            }
                            FieldType::List => {
                                let Some(header) =
                                    self.read_tracked(buffer, |p, b| p.read_list_begin(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                *self.stack.last_mut().expect("value task on stack") =
                                    BodyTask::ListItems {
                                        elem: header.elem_type,
                                        remaining: header.size,
                                    };
                                deliver!(DecoderEvent::ListBegin(header.elem_type, header.size));
                            }
                            FieldType::Set => {
                                let Some(header) =
                                    self.read_tracked(buffer, |p, b| p.read_set_begin(b))?
                                else {
                                    return Ok(DecodeStatus::Underflow);
                                };
                                *self.stack.last_mut().expect("value task on stack") =
                                    BodyTask::SetItems {
                                        elem: header.elem_type,
                                        remaining: header.size,
                                    };
                                deliver!(DecoderEvent::SetBegin(header.elem_type, header.size));
                            }
                            FieldType::Stop | FieldType::Void => {
                                return Err(
                                    ProtocolError::UnexpectedValueType(field_type).into()
                                );
                            }
                        },
                        BodyTask::StructFields => {
                            let Some(header) =
                                self.read_tracked(buffer, |p, b| p.read_field_begin(b))?
                            else {
                                return Ok(DecodeStatus::Underflow);
                            };
                            if header.field_type == FieldType::Stop {
                                self.read_tracked(buffer, |p, b| p.read_struct_end(b))?;
                                self.stack.pop();
                                deliver!(DecoderEvent::StructEnd);
                            } else {
                                self.stack.push(BodyTask::FieldEnd);
                                self.stack.push(BodyTask::Value(header.field_type));
                                deliver!(DecoderEvent::FieldBegin(
                                    header.name,
                                    header.field_type,
                                    header.field_id,
                                ));
                            }
                        }
                        BodyTask::FieldEnd => {
                            self.read_tracked(buffer, |p, b| p.read_field_end(b))?;
                            self.stack.pop();
                            deliver!(DecoderEvent::FieldEnd);
                        }
                        BodyTask::ListItems { elem, remaining } => {
                            if remaining == 0 {
                                self.read_tracked(buffer, |p, b| p.read_list_end(b))?;
                                self.stack.pop();
                                deliver!(DecoderEvent::ListEnd);
                            } else {
                                *self.stack.last_mut().expect("list task on stack") =
                                    BodyTask::ListItems {
                                        elem,
                                        remaining: remaining - 1,
                                    };
                                self.stack.push(BodyTask::Value(elem));
                            }
                        }
                        BodyTask::SetItems { elem, remaining } => {
                            if remaining == 0 {
                                self.read_tracked(buffer, |p, b| p.read_set_end(b))?;
                                self.stack.pop();
                                deliver!(DecoderEvent::SetEnd);
                            } else {
                                *self.stack.last_mut().expect("set task on stack") =
                                    BodyTask::SetItems {
                                        elem,
                                        remaining: remaining - 1,
                                    };
                                self.stack.push(BodyTask::Value(elem));
                            }
                        }
                        BodyTask::MapItems { key, value, remaining, expect_key } => {
                            if remaining == 0 {
                                self.read_tracked(buffer, |p, b| p.read_map_end(b))?;
                                self.stack.pop();
                                deliver!(DecoderEvent::MapEnd);
                            } else if expect_key {
                                *self.stack.last_mut().expect("map task on stack") =
                                    BodyTask::MapItems {
                                        key,
                                        value,
                                        remaining,
                                        expect_key: false,
                                    };
                                self.stack.push(BodyTask::Value(key));
                            } else {
                                *self.stack.last_mut().expect("map task on stack") =
                                    BodyTask::MapItems {
                                        key,
                                        value,
                                        remaining: remaining - 1,
                                        expect_key: true,
                                    };
                                self.stack.push(BodyTask::Value(value));
                            }
                        }
                    }
                }
                MachineState::MessageEnd => {
                    let Some(()) = self.read_tracked(buffer, |p, b| p.read_message_end(b))?
                    else {
                        return Ok(DecodeStatus::Underflow);
                    };
                    self.state = MachineState::FrameEnd;
                    deliver!(DecoderEvent::MessageEnd);
                }
                MachineState::FrameEnd => {
                    if let Some(declared) = self.frame_size {
                        if self.frame_consumed != declared {
                            return Err(TransportError::FrameSizeMismatch {
                                consumed: self.frame_consumed,
                                declared,
                            }
                            .into());
                        }
                    }
                    self.transport.decode_frame_end(buffer)?;
                    self.state = MachineState::FrameStart;
                    self.frame_size = None;
                    return match callbacks.event(DecoderEvent::TransportEnd)? {
                        FilterStatus::Continue => Ok(DecodeStatus::Complete),
                        FilterStatus::StopIteration => Ok(DecodeStatus::Stopped),
                    };
                }
            }
        }
    }

    /// Run one protocol read, charging consumed bytes against the frame's
    /// declared length.
    fn read_tracked<T>(
        &mut self,
        buffer: &mut BytesMut,
        read: impl FnOnce(&mut dyn Protocol, &mut BytesMut) -> Result<Option<T>, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        let before = buffer.len();
        let result = read(self.protocol.as_mut(), buffer)?;
        self.frame_consumed += (before - buffer.len()) as u64;
        if let Some(declared) = self.frame_size {
            if self.frame_consumed > declared {
                return Err(TransportError::FrameSizeMismatch {
                    consumed: self.frame_consumed,
                    declared,
                }
                .into());
            }
        }
        Ok(result)
    }
}
