//! Polling payload framing and websocket binary marking.
//!
//! A polling request body carries several packets at once; the two wire
//! generations frame them differently:
//!
//! - v3 concatenates `"<byteLen>:<packetText>"` with no separator;
//! - v4 joins packet texts with the ASCII record separator `0x1E`.
//!
//! Binary attachments in a polling body are base64 with a leading `'b'`
//! marker in both generations. On a websocket, packets map 1:1 to frames and
//! carry no length prefix; a v3 binary websocket frame is marked with exactly
//! one leading `0x04` byte.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;

use crate::engine::EngineIoVersion;
use crate::error::ProtocolError;

/// Record separator between packets in a v4 polling body.
pub const RECORD_SEPARATOR: char = '\x1e';

/// v3 marker byte for a websocket binary frame carrying an Engine.IO Message.
pub const V3_BINARY_MARKER: u8 = 0x04;

/// One protocol unit inside a polling payload or websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawUnit {
    Text(String),
    Binary(Bytes),
}

/// Assemble a polling request body from packet units.
#[must_use]
pub fn encode_payload(units: &[RawUnit], version: EngineIoVersion) -> String {
    let sections: Vec<String> = units
        .iter()
        .map(|unit| match unit {
            RawUnit::Text(text) => text.clone(),
            RawUnit::Binary(data) => format!("b{}", BASE64_STANDARD.encode(data)),
        })
        .collect();

    match version {
        EngineIoVersion::V3 => sections
            .iter()
            .map(|s| format!("{}:{s}", s.len()))
            .collect(),
        EngineIoVersion::V4 => sections.join(&RECORD_SEPARATOR.to_string()),
    }
}

/// Split a polling response body into packet units.
///
/// # Errors
///
/// Returns an error on a malformed v3 length prefix or invalid base64. The
/// caller drops the payload and continues with the next poll.
pub fn decode_payload(body: &str, version: EngineIoVersion) -> Result<Vec<RawUnit>, ProtocolError> {
    match version {
        EngineIoVersion::V3 => decode_v3(body),
        EngineIoVersion::V4 => body
            .split(RECORD_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(decode_section)
            .collect(),
    }
}

fn decode_v3(body: &str) -> Result<Vec<RawUnit>, ProtocolError> {
    let mut units = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let colon = rest
            .find(':')
            .ok_or_else(|| ProtocolError::MalformedLength(rest.to_string()))?;
        let (digits, tail) = rest.split_at(colon);
        let len: usize = digits
            .parse()
            .map_err(|_| ProtocolError::MalformedLength(digits.to_string()))?;

        let tail = &tail[1..];
        let section = tail
            .get(..len)
            .ok_or_else(|| ProtocolError::MalformedLength(format!("{digits}:{tail}")))?;

        units.push(decode_section(section)?);
        rest = &tail[len..];
    }

    Ok(units)
}

fn decode_section(section: &str) -> Result<RawUnit, ProtocolError> {
    if let Some(encoded) = section.strip_prefix('b') {
        let data = BASE64_STANDARD.decode(encoded)?;
        Ok(RawUnit::Binary(Bytes::from(data)))
    } else {
        Ok(RawUnit::Text(section.to_string()))
    }
}

/// Mark outbound websocket binary data for the given generation.
#[must_use]
pub fn encode_ws_binary(data: Bytes, version: EngineIoVersion) -> Bytes {
    match version {
        EngineIoVersion::V3 => {
            let mut framed = Vec::with_capacity(data.len() + 1);
            framed.push(V3_BINARY_MARKER);
            framed.extend_from_slice(&data);
            Bytes::from(framed)
        }
        EngineIoVersion::V4 => data,
    }
}

/// Strip the generation's websocket binary marking from inbound data.
///
/// # Errors
///
/// Returns an error if a v3 frame is missing its marker byte.
pub fn decode_ws_binary(data: Bytes, version: EngineIoVersion) -> Result<Bytes, ProtocolError> {
    match version {
        EngineIoVersion::V3 => {
            if data.first() == Some(&V3_BINARY_MARKER) {
                Ok(data.slice(1..))
            } else {
                Err(ProtocolError::MalformedPayload(
                    "v3 binary frame without 0x04 marker".into(),
                ))
            }
        }
        EngineIoVersion::V4 => Ok(data),
    }
}
