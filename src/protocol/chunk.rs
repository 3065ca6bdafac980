//! RTMP chunk stream demuxer and muxer
//!
//! RTMP multiplexes messages over one TCP connection by splitting them
//! into chunks, each prefixed with a basic header (format + chunk stream
//! id) and a message header whose size depends on the format:
//!
//! ```text
//! fmt 0 (11 bytes): timestamp(3) length(3) type(1) stream_id(4, LE)
//! fmt 1 (7 bytes):  ts_delta(3) length(3) type(1)
//! fmt 2 (3 bytes):  ts_delta(3)
//! fmt 3 (0 bytes):  everything inherited
//! ```
//!
//! A timestamp or delta field of 0xFFFFFF means the real value follows as
//! a 4-byte extended timestamp.
//!
//! The demuxer never consumes input until an entire chunk (headers plus
//! data) is buffered, so feeding it one byte at a time produces exactly
//! the same messages as feeding it everything at once.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE, MSG_ABORT,
    MSG_SET_CHUNK_SIZE,
};

/// A fully reassembled RTMP message, not yet interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub msg_type: u8,
    pub timestamp: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Per-chunk-stream decoder state, inherited by compressed headers
#[derive(Debug)]
struct ChunkStreamState {
    timestamp: u32,
    delta: u32,
    length: u32,
    msg_type: u8,
    stream_id: u32,
    /// Last header used an extended timestamp; fmt 3 chunks then carry one too
    extended: bool,
    /// Partially assembled message payload
    partial: BytesMut,
}

/// Chunk stream demuxer
///
/// Call [`decode`](ChunkDemuxer::decode) in a loop after appending
/// received bytes to the buffer; each call yields at most one message.
/// SetChunkSize and Abort are applied internally (and still returned).
#[derive(Debug)]
pub struct ChunkDemuxer {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDemuxer {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Try to decode one message from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds less than one full chunk;
    /// in that case nothing has been consumed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            let Some((fmt, csid, basic_len)) = peek_basic_header(buf) else {
                return Ok(None);
            };

            if fmt != 0 && !self.streams.contains_key(&csid) {
                return Err(ProtocolError::UnknownChunkStream(csid).into());
            }

            let header_len = match fmt {
                0 => 11,
                1 => 7,
                2 => 3,
                _ => 0,
            };
            if buf.len() < basic_len + header_len {
                return Ok(None);
            }

            // Peek the message header without consuming anything yet.
            let header = &buf[basic_len..basic_len + header_len];
            let ts_field = if fmt < 3 { read_u24(&header[0..3]) } else { 0 };
            let extended = match fmt {
                0 | 1 | 2 => ts_field == EXTENDED_TIMESTAMP,
                _ => self.streams.get(&csid).map(|s| s.extended).unwrap_or(false),
            };
            let ext_len = if extended { 4 } else { 0 };

            let length = match fmt {
                0 | 1 => read_u24(&header[3..6]),
                _ => self.streams[&csid].length,
            };
            if length > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge {
                    size: length,
                    max: MAX_MESSAGE_SIZE,
                }
                .into());
            }

            // A fmt 3 chunk continues an in-progress message; any other
            // format starts a new one.
            let continuation = fmt == 3
                && self
                    .streams
                    .get(&csid)
                    .map(|s| !s.partial.is_empty())
                    .unwrap_or(false);
            let already = if continuation {
                self.streams[&csid].partial.len() as u32
            } else {
                0
            };
            let data_len = (length - already).min(self.chunk_size) as usize;

            if buf.len() < basic_len + header_len + ext_len + data_len {
                return Ok(None);
            }

            // The whole chunk is buffered; now consume it.
            buf.advance(basic_len);
            match fmt {
                0 => {
                    let _ = buf.get_uint(3);
                    let length = buf.get_uint(3) as u32;
                    let msg_type = buf.get_u8();
                    let stream_id = buf.get_u32_le();
                    let timestamp = if extended { buf.get_u32() } else { ts_field };
                    let state = self.streams.entry(csid).or_insert_with(|| ChunkStreamState {
                        timestamp: 0,
                        delta: 0,
                        length: 0,
                        msg_type: 0,
                        stream_id: 0,
                        extended: false,
                        partial: BytesMut::new(),
                    });
                    state.timestamp = timestamp;
                    state.delta = 0;
                    state.length = length;
                    state.msg_type = msg_type;
                    state.stream_id = stream_id;
                    state.extended = extended;
                    state.partial.clear();
                }
                1 => {
                    let _ = buf.get_uint(3);
                    let length = buf.get_uint(3) as u32;
                    let msg_type = buf.get_u8();
                    let delta = if extended { buf.get_u32() } else { ts_field };
                    let state = self.streams.get_mut(&csid).unwrap();
                    state.delta = delta;
                    state.timestamp = state.timestamp.wrapping_add(delta);
                    state.length = length;
                    state.msg_type = msg_type;
                    state.extended = extended;
                    state.partial.clear();
                }
                2 => {
                    let _ = buf.get_uint(3);
                    let delta = if extended { buf.get_u32() } else { ts_field };
                    let state = self.streams.get_mut(&csid).unwrap();
                    state.delta = delta;
                    state.timestamp = state.timestamp.wrapping_add(delta);
                    state.extended = extended;
                    state.partial.clear();
                }
                _ => {
                    if extended {
                        let _ = buf.get_u32();
                    }
                    let state = self.streams.get_mut(&csid).unwrap();
                    // Continuation chunks carry more of the same message;
                    // the delta applies only when fmt 3 starts a new one.
                    if !continuation {
                        state.timestamp = state.timestamp.wrapping_add(state.delta);
                        state.partial.clear();
                    }
                }
            }

            let state = self.streams.get_mut(&csid).unwrap();
            state.partial.extend_from_slice(&buf[..data_len]);
            buf.advance(data_len);

            if (state.partial.len() as u32) < state.length {
                // Message still incomplete; try the next chunk in the buffer.
                continue;
            }

            let message = RawMessage {
                msg_type: state.msg_type,
                timestamp: state.timestamp,
                stream_id: state.stream_id,
                payload: state.partial.split().freeze(),
            };
            self.apply_protocol_control(&message)?;
            return Ok(Some(message));
        }
    }

    /// Apply chunk-layer control messages so later chunks in the same
    /// buffer parse with the renegotiated settings.
    fn apply_protocol_control(&mut self, message: &RawMessage) -> Result<()> {
        match message.msg_type {
            MSG_SET_CHUNK_SIZE => {
                if message.payload.len() < 4 {
                    return Err(ProtocolError::TruncatedControl(MSG_SET_CHUNK_SIZE).into());
                }
                let size = u32::from_be_bytes([
                    message.payload[0],
                    message.payload[1],
                    message.payload[2],
                    message.payload[3],
                ]) & 0x7FFF_FFFF;
                if size == 0 || size > MAX_CHUNK_SIZE {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                self.chunk_size = size;
            }
            MSG_ABORT => {
                if message.payload.len() < 4 {
                    return Err(ProtocolError::TruncatedControl(MSG_ABORT).into());
                }
                let csid = u32::from_be_bytes([
                    message.payload[0],
                    message.payload[1],
                    message.payload[2],
                    message.payload[3],
                ]);
                if let Some(state) = self.streams.get_mut(&csid) {
                    state.partial.clear();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for ChunkDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the 1-3 byte basic header without consuming it.
/// Returns (fmt, csid, header length), or None if more bytes are needed.
fn peek_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let b0 = *buf.first()?;
    let fmt = b0 >> 6;
    match b0 & 0x3F {
        0 => {
            let b1 = *buf.get(1)?;
            Some((fmt, 64 + b1 as u32, 2))
        }
        1 => {
            if buf.len() < 3 {
                return None;
            }
            Some((fmt, 64 + buf[1] as u32 + 256 * buf[2] as u32, 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32
}

/// Last header sent on an outbound chunk stream, for header compression
#[derive(Debug, Clone, Copy)]
struct LastSent {
    timestamp: u32,
    stream_id: u32,
}

/// Chunk stream muxer for outbound messages
#[derive(Debug)]
pub struct ChunkMuxer {
    chunk_size: u32,
    last: HashMap<u32, LastSent>,
}

impl ChunkMuxer {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            last: HashMap::new(),
        }
    }

    /// Must be called after sending a SetChunkSize message.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunk a message for the wire. Uses a fmt 1 header when the previous
    /// message on this chunk stream allows it, fmt 0 otherwise; payload
    /// continuation chunks use fmt 3.
    pub fn encode(
        &mut self,
        csid: u32,
        msg_type: u8,
        timestamp: u32,
        stream_id: u32,
        payload: &[u8],
    ) -> Bytes {
        let prev = self.last.get(&csid).copied();
        let use_delta = matches!(prev, Some(p) if p.stream_id == stream_id && timestamp >= p.timestamp);

        let ts_field = if use_delta {
            timestamp - prev.unwrap().timestamp
        } else {
            timestamp
        };
        let extended = ts_field >= EXTENDED_TIMESTAMP;
        let wire_ts = if extended { EXTENDED_TIMESTAMP } else { ts_field };

        let chunk_size = self.chunk_size as usize;
        let chunk_count = payload.len().div_ceil(chunk_size).max(1);
        let mut buf = BytesMut::with_capacity(payload.len() + 16 + chunk_count * 4);

        // First chunk: fmt 0 or fmt 1 header
        write_basic_header(&mut buf, if use_delta { 1 } else { 0 }, csid);
        write_u24(&mut buf, wire_ts);
        write_u24(&mut buf, payload.len() as u32);
        buf.put_u8(msg_type);
        if !use_delta {
            buf.put_u32_le(stream_id);
        }
        if extended {
            buf.put_u32(ts_field);
        }

        let first = payload.len().min(chunk_size);
        buf.put_slice(&payload[..first]);

        // Remaining payload goes out as fmt 3 continuation chunks
        let mut offset = first;
        while offset < payload.len() {
            write_basic_header(&mut buf, 3, csid);
            if extended {
                buf.put_u32(ts_field);
            }
            let end = (offset + chunk_size).min(payload.len());
            buf.put_slice(&payload[offset..end]);
            offset = end;
        }

        self.last.insert(
            csid,
            LastSent {
                timestamp,
                stream_id,
            },
        );
        buf.freeze()
    }
}

impl Default for ChunkMuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        2..=63 => buf.put_u8(fmt << 6 | csid as u8),
        64..=319 => {
            buf.put_u8(fmt << 6);
            buf.put_u8((csid - 64) as u8);
        }
        _ => {
            buf.put_u8(fmt << 6 | 1);
            buf.put_u16_le((csid - 64) as u16);
        }
    }
}

fn write_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::constants::{CSID_AUDIO, CSID_COMMAND, CSID_VIDEO, MSG_AUDIO, MSG_VIDEO};

    fn drain(demuxer: &mut ChunkDemuxer, buf: &mut BytesMut) -> Vec<RawMessage> {
        let mut out = Vec::new();
        while let Some(msg) = demuxer.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    fn set_chunk_size_message(size: u32) -> Bytes {
        Bytes::copy_from_slice(&size.to_be_bytes())
    }

    #[test]
    fn test_single_small_message() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        let payload = vec![0xAB; 100];
        let wire = muxer.encode(CSID_AUDIO, MSG_AUDIO, 1000, 1, &payload);

        let mut buf = BytesMut::from(&wire[..]);
        let msg = demuxer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.msg_type, MSG_AUDIO);
        assert_eq!(msg.timestamp, 1000);
        assert_eq!(msg.stream_id, 1);
        assert_eq!(msg.payload.len(), 100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_larger_than_chunk_size() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        // 500 bytes at chunk size 128 needs four chunks
        let payload: Vec<u8> = (0..500).map(|i| i as u8).collect();
        let wire = muxer.encode(CSID_VIDEO, MSG_VIDEO, 40, 1, &payload);

        let mut buf = BytesMut::from(&wire[..]);
        let msg = demuxer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&msg.payload[..], &payload[..]);
    }

    /// Byte-at-a-time feeding must produce the same messages as one shot.
    #[test]
    fn test_chunking_boundary_independence() {
        let wire = build_mixed_traffic();

        let mut all_at_once = ChunkDemuxer::new();
        let mut buf = BytesMut::from(&wire[..]);
        let expected = drain(&mut all_at_once, &mut buf);
        assert!(expected.len() >= 5);

        let mut byte_wise = ChunkDemuxer::new();
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for &b in wire.iter() {
            buf.put_u8(b);
            got.extend(drain(&mut byte_wise, &mut buf));
        }
        assert_eq!(got, expected);

        // And with an arbitrary split size
        let mut split_wise = ChunkDemuxer::new();
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for piece in wire.chunks(7) {
            buf.put_slice(piece);
            got.extend(drain(&mut split_wise, &mut buf));
        }
        assert_eq!(got, expected);
    }

    /// Traffic covering delta headers, oversized messages, a mid-stream
    /// SetChunkSize and an extended timestamp.
    fn build_mixed_traffic() -> Bytes {
        let mut muxer = ChunkMuxer::new();
        let mut wire = BytesMut::new();

        wire.put_slice(&muxer.encode(CSID_AUDIO, MSG_AUDIO, 0, 1, &[1u8; 60]));
        wire.put_slice(&muxer.encode(CSID_AUDIO, MSG_AUDIO, 20, 1, &[2u8; 60]));
        wire.put_slice(&muxer.encode(CSID_VIDEO, MSG_VIDEO, 20, 1, &vec![3u8; 300]));

        // Renegotiate the chunk size mid-stream
        wire.put_slice(&muxer.encode(
            2,
            MSG_SET_CHUNK_SIZE,
            0,
            0,
            &set_chunk_size_message(512),
        ));
        muxer.set_chunk_size(512);

        wire.put_slice(&muxer.encode(CSID_VIDEO, MSG_VIDEO, 40, 1, &vec![4u8; 400]));
        // Extended timestamp territory
        wire.put_slice(&muxer.encode(CSID_AUDIO, MSG_AUDIO, 0x0100_0000, 1, &[5u8; 10]));

        wire.freeze()
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        // Craft by hand: a 256-byte video message interleaved with a
        // complete audio message between its two chunks.
        let mut wire = BytesMut::new();

        // Video fmt 0 header, length 256, first 128 bytes
        wire.put_u8(CSID_VIDEO as u8); // fmt 0
        write_u24(&mut wire, 100);
        write_u24(&mut wire, 256);
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(1);
        wire.put_slice(&vec![7u8; 128]);

        // Audio fmt 0, complete 50-byte message
        wire.put_u8(CSID_AUDIO as u8);
        write_u24(&mut wire, 100);
        write_u24(&mut wire, 50);
        wire.put_u8(MSG_AUDIO);
        wire.put_u32_le(1);
        wire.put_slice(&vec![8u8; 50]);

        // Video continuation, fmt 3
        wire.put_u8(0b1100_0000 | CSID_VIDEO as u8);
        wire.put_slice(&vec![7u8; 128]);

        let mut demuxer = ChunkDemuxer::new();
        let mut buf = BytesMut::from(&wire[..]);
        let messages = drain(&mut demuxer, &mut buf);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].msg_type, MSG_AUDIO);
        assert_eq!(messages[0].payload.len(), 50);
        assert_eq!(messages[1].msg_type, MSG_VIDEO);
        assert_eq!(messages[1].payload.len(), 256);
        assert_eq!(messages[1].timestamp, 100);
    }

    /// Continuation chunks must not re-apply the timestamp delta.
    #[test]
    fn test_continuation_does_not_advance_timestamp() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        let mut buf = BytesMut::new();
        buf.put_slice(&muxer.encode(CSID_VIDEO, MSG_VIDEO, 0, 1, &[1u8; 10]));
        // Delta header plus two fmt 3 continuations (300 > 2 * 128)
        buf.put_slice(&muxer.encode(CSID_VIDEO, MSG_VIDEO, 40, 1, &vec![2u8; 300]));

        let messages = drain(&mut demuxer, &mut buf);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].timestamp, 0);
        assert_eq!(messages[1].timestamp, 40);
    }

    #[test]
    fn test_compressed_header_without_prior_state_errors() {
        // fmt 1 on csid 9, never seen before
        let mut buf = BytesMut::new();
        buf.put_u8(0b0100_0000 | 9);
        write_u24(&mut buf, 10);
        write_u24(&mut buf, 4);
        buf.put_u8(MSG_AUDIO);
        buf.put_slice(&[0u8; 4]);

        let mut demuxer = ChunkDemuxer::new();
        let result = demuxer.decode(&mut buf);
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnknownChunkStream(9)))
        ));
    }

    #[test]
    fn test_message_too_large_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(CSID_VIDEO as u8); // fmt 0
        write_u24(&mut buf, 0);
        write_u24(&mut buf, MAX_MESSAGE_SIZE + 1);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32_le(1);

        let mut demuxer = ChunkDemuxer::new();
        let result = demuxer.decode(&mut buf);
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_set_chunk_size_zero_rejected() {
        let mut muxer = ChunkMuxer::new();
        let wire = muxer.encode(2, MSG_SET_CHUNK_SIZE, 0, 0, &set_chunk_size_message(0));

        let mut demuxer = ChunkDemuxer::new();
        let mut buf = BytesMut::from(&wire[..]);
        assert!(demuxer.decode(&mut buf).is_err());
    }

    #[test]
    fn test_extended_timestamp_roundtrip() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        let ts = 0x0123_4567u32;
        let wire = muxer.encode(CSID_COMMAND, MSG_AUDIO, ts, 1, &vec![9u8; 200]);
        let mut buf = BytesMut::from(&wire[..]);

        let msg = demuxer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, ts);
        assert_eq!(msg.payload.len(), 200);
    }

    #[test]
    fn test_two_byte_basic_header() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        // csid 100 requires the 2-byte basic header form
        let wire = muxer.encode(100, MSG_AUDIO, 5, 1, &[1u8; 16]);
        let mut buf = BytesMut::from(&wire[..]);

        let msg = demuxer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 16);
        assert_eq!(msg.timestamp, 5);
    }

    #[test]
    fn test_empty_payload_message() {
        let mut muxer = ChunkMuxer::new();
        let mut demuxer = ChunkDemuxer::new();

        let wire = muxer.encode(CSID_COMMAND, MSG_AUDIO, 0, 1, &[]);
        let mut buf = BytesMut::from(&wire[..]);

        let msg = demuxer.decode(&mut buf).unwrap().unwrap();
        assert!(msg.payload.is_empty());
    }
}
