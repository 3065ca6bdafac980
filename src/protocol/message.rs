//! Typed RTMP messages
//!
//! Interprets reassembled [`RawMessage`]s: protocol control, user control
//! events, media payloads and the AMF0 command plane. Command messages
//! typed as AMF3 (type 17) are accepted too; real encoders prefix an
//! AMF0 body with a single switch byte, which we skip.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::amf::{amf0, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// User control message (type 4) events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    PingRequest(u32),
    PingResponse(u32),
    Other(u16),
}

/// A decoded RTMP message
#[derive(Debug, Clone)]
pub enum Message {
    /// Peer renegotiated its chunk size (already applied by the demuxer)
    SetChunkSize(u32),
    /// Discard a partial message on a chunk stream (applied by the demuxer)
    Abort(u32),
    /// Byte-count acknowledgement from the peer
    Ack(u32),
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    /// AMF data message (@setDataFrame / onMetaData)
    Data { timestamp: u32, values: Vec<AmfValue> },
    Command(Command),
    /// Message types we pass over without interpreting
    Unknown { msg_type: u8 },
}

impl Message {
    pub fn from_raw(raw: RawMessage) -> Result<Message> {
        let mut payload = raw.payload;
        match raw.msg_type {
            MSG_SET_CHUNK_SIZE => Ok(Message::SetChunkSize(read_u32_payload(
                &payload,
                MSG_SET_CHUNK_SIZE,
            )?)),
            MSG_ABORT => Ok(Message::Abort(read_u32_payload(&payload, MSG_ABORT)?)),
            MSG_ACK => Ok(Message::Ack(read_u32_payload(&payload, MSG_ACK)?)),
            MSG_USER_CONTROL => {
                if payload.len() < 2 {
                    return Err(ProtocolError::TruncatedControl(MSG_USER_CONTROL).into());
                }
                let event_type = payload.get_u16();
                let event = match event_type {
                    EVENT_STREAM_BEGIN | EVENT_STREAM_EOF | EVENT_PING_REQUEST
                    | EVENT_PING_RESPONSE => {
                        if payload.len() < 4 {
                            return Err(ProtocolError::TruncatedControl(MSG_USER_CONTROL).into());
                        }
                        let value = payload.get_u32();
                        match event_type {
                            EVENT_STREAM_BEGIN => UserControlEvent::StreamBegin(value),
                            EVENT_STREAM_EOF => UserControlEvent::StreamEof(value),
                            EVENT_PING_REQUEST => UserControlEvent::PingRequest(value),
                            _ => UserControlEvent::PingResponse(value),
                        }
                    }
                    other => UserControlEvent::Other(other),
                };
                Ok(Message::UserControl(event))
            }
            MSG_WINDOW_ACK_SIZE => Ok(Message::WindowAckSize(read_u32_payload(
                &payload,
                MSG_WINDOW_ACK_SIZE,
            )?)),
            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::TruncatedControl(MSG_SET_PEER_BANDWIDTH).into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(Message::SetPeerBandwidth { size, limit_type })
            }
            MSG_AUDIO => Ok(Message::Audio {
                timestamp: raw.timestamp,
                data: payload,
            }),
            MSG_VIDEO => Ok(Message::Video {
                timestamp: raw.timestamp,
                data: payload,
            }),
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.msg_type == MSG_DATA_AMF3 {
                    skip_amf3_switch(&mut payload);
                }
                let values = amf0::decode_all(&mut payload)?;
                Ok(Message::Data {
                    timestamp: raw.timestamp,
                    values,
                })
            }
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if raw.msg_type == MSG_COMMAND_AMF3 {
                    skip_amf3_switch(&mut payload);
                }
                let command = Command::from_amf(amf0::decode_all(&mut payload)?, raw.stream_id)?;
                Ok(Message::Command(command))
            }
            other => Ok(Message::Unknown { msg_type: other }),
        }
    }
}

fn read_u32_payload(payload: &Bytes, msg_type: u8) -> Result<u32> {
    if payload.len() < 4 {
        return Err(ProtocolError::TruncatedControl(msg_type).into());
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// AMF3-typed commands from real encoders carry an AMF0 body behind one
/// leading switch byte (0x00).
fn skip_amf3_switch(payload: &mut Bytes) {
    if payload.first() == Some(&0x00) {
        payload.advance(1);
    }
}

/// An AMF command message (connect, publish, play, _result, onStatus, ...)
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// The command object (first argument, often Null)
    pub object: AmfValue,
    /// Remaining arguments
    pub args: Vec<AmfValue>,
    /// Message stream id the command arrived on
    pub stream_id: u32,
}

impl Command {
    fn from_amf(values: Vec<AmfValue>, stream_id: u32) -> Result<Self> {
        let mut iter = values.into_iter();
        let name = match iter.next() {
            Some(AmfValue::String(s)) => s,
            _ => return Err(ProtocolError::InvalidCommand("missing name".into()).into()),
        };
        let transaction_id = match iter.next() {
            Some(AmfValue::Number(n)) => n,
            Some(_) | None => 0.0,
        };
        let object = iter.next().unwrap_or(AmfValue::Null);
        let args = iter.collect();
        Ok(Self {
            name,
            transaction_id,
            object,
            args,
            stream_id,
        })
    }

    /// First string argument after the command object (publish/play name)
    pub fn first_arg_str(&self) -> Option<&str> {
        self.args.first().and_then(|v| v.as_str())
    }

    /// Build a `_result` response for this command's transaction.
    pub fn result(transaction_id: f64, object: AmfValue, args: Vec<AmfValue>) -> Self {
        Self {
            name: CMD_RESULT.to_string(),
            transaction_id,
            object,
            args,
            stream_id: 0,
        }
    }

    /// Build an `onStatus` notification.
    pub fn on_status(level: &str, code: &str, description: &str) -> Self {
        let mut info = HashMap::new();
        info.insert("level".to_string(), AmfValue::from(level));
        info.insert("code".to_string(), AmfValue::from(code));
        info.insert("description".to_string(), AmfValue::from(description));
        Self {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            object: AmfValue::Null,
            args: vec![AmfValue::Object(info)],
            stream_id: 0,
        }
    }

    /// Encode the command body for a type-20 (AMF0 command) message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        amf0::encode_into(&AmfValue::from(self.name.as_str()), &mut buf);
        amf0::encode_into(&AmfValue::Number(self.transaction_id), &mut buf);
        amf0::encode_into(&self.object, &mut buf);
        for arg in &self.args {
            amf0::encode_into(arg, &mut buf);
        }
        buf.freeze()
    }
}

/// Encode a user control event body for a type-4 message.
pub fn encode_user_control(event: &UserControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    match event {
        UserControlEvent::StreamBegin(v) => {
            buf.put_u16(EVENT_STREAM_BEGIN);
            buf.put_u32(*v);
        }
        UserControlEvent::StreamEof(v) => {
            buf.put_u16(EVENT_STREAM_EOF);
            buf.put_u32(*v);
        }
        UserControlEvent::PingRequest(v) => {
            buf.put_u16(EVENT_PING_REQUEST);
            buf.put_u32(*v);
        }
        UserControlEvent::PingResponse(v) => {
            buf.put_u16(EVENT_PING_RESPONSE);
            buf.put_u32(*v);
        }
        UserControlEvent::Other(t) => {
            buf.put_u16(*t);
        }
    }
    buf.freeze()
}

/// Encode a 4-byte big-endian control body (SetChunkSize, Ack, WindowAckSize).
pub fn encode_u32(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Encode a SetPeerBandwidth body.
pub fn encode_peer_bandwidth(size: u32, limit_type: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(size);
    buf.put_u8(limit_type);
    buf.freeze()
}
