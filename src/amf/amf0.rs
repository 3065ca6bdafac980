//! AMF0 encoder and decoder
//!
//! The RTMP command plane is AMF0. This module covers the markers real
//! encoders actually emit on the wire:
//!
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x00 0x00 0x09)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (count-prefixed associative array)
//! 0x09 - Object End
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double millis + ignored timezone)
//! 0x0C - Long String (32-bit length prefix)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

/// Nesting limit for objects/arrays. Deep enough for any real command
/// object, shallow enough to bound recursion on hostile input.
const MAX_DEPTH: usize = 16;

/// Decode a single AMF0 value, advancing the buffer past it.
pub fn decode(buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    decode_at_depth(buf, 0)
}

/// Decode every value in the buffer. Command message bodies are a flat
/// sequence: name, transaction id, then zero or more arguments.
pub fn decode_all(buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode_at_depth(buf, 0)?);
    }
    Ok(values)
}

fn decode_at_depth(buf: &mut Bytes, depth: usize) -> Result<AmfValue, AmfError> {
    if depth > MAX_DEPTH {
        return Err(AmfError::NestingTooDeep);
    }
    need(buf, 1)?;
    let marker = buf.get_u8();
    match marker {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(AmfValue::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(AmfValue::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(AmfValue::String(read_short_string(buf)?)),
        MARKER_LONG_STRING => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            need(buf, len)?;
            let raw = buf.split_to(len);
            let s = std::str::from_utf8(&raw).map_err(|_| AmfError::InvalidUtf8)?;
            Ok(AmfValue::String(s.to_string()))
        }
        MARKER_OBJECT => Ok(AmfValue::Object(read_properties(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            // The count prefix is advisory; the terminator is authoritative.
            need(buf, 4)?;
            let _count = buf.get_u32();
            Ok(AmfValue::EcmaArray(read_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_at_depth(buf, depth + 1)?);
            }
            Ok(AmfValue::StrictArray(items))
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let millis = buf.get_f64();
            let _tz = buf.get_i16();
            Ok(AmfValue::Date(millis))
        }
        MARKER_NULL => Ok(AmfValue::Null),
        MARKER_UNDEFINED => Ok(AmfValue::Undefined),
        other => Err(AmfError::UnknownMarker(other)),
    }
}

/// Read object properties up to the empty-key + object-end terminator.
fn read_properties(
    buf: &mut Bytes,
    depth: usize,
) -> Result<HashMap<String, AmfValue>, AmfError> {
    let mut props = HashMap::new();
    loop {
        let key = read_short_string(buf)?;
        if key.is_empty() {
            need(buf, 1)?;
            let end = buf.get_u8();
            if end != MARKER_OBJECT_END {
                return Err(AmfError::InvalidObjectEnd);
            }
            return Ok(props);
        }
        let value = decode_at_depth(buf, depth + 1)?;
        props.insert(key, value);
    }
}

fn read_short_string(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    let s = std::str::from_utf8(&raw).map_err(|_| AmfError::InvalidUtf8)?;
    Ok(s.to_string())
}

fn need(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        return Err(AmfError::UnexpectedEof);
    }
    Ok(())
}

/// Encode a single AMF0 value.
pub fn encode(value: &AmfValue) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.freeze()
}

/// Encode a flat sequence of values (a command message body).
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut buf = BytesMut::new();
    for value in values {
        encode_into(value, &mut buf);
    }
    buf.freeze()
}

pub fn encode_into(value: &AmfValue, buf: &mut BytesMut) {
    match value {
        AmfValue::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        AmfValue::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        AmfValue::String(s) => {
            if s.len() > u16::MAX as usize {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
            } else {
                buf.put_u8(MARKER_STRING);
                buf.put_u16(s.len() as u16);
            }
            buf.put_slice(s.as_bytes());
        }
        AmfValue::Object(props) => {
            buf.put_u8(MARKER_OBJECT);
            write_properties(props, buf);
        }
        AmfValue::EcmaArray(props) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(props.len() as u32);
            write_properties(props, buf);
        }
        AmfValue::StrictArray(items) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(items.len() as u32);
            for item in items {
                encode_into(item, buf);
            }
        }
        AmfValue::Date(millis) => {
            buf.put_u8(MARKER_DATE);
            buf.put_f64(*millis);
            buf.put_i16(0);
        }
        AmfValue::Null => buf.put_u8(MARKER_NULL),
        AmfValue::Undefined => buf.put_u8(MARKER_UNDEFINED),
    }
}

fn write_properties(props: &HashMap<String, AmfValue>, buf: &mut BytesMut) {
    for (key, value) in props {
        buf.put_u16(key.len() as u16);
        buf.put_slice(key.as_bytes());
        encode_into(value, buf);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}
