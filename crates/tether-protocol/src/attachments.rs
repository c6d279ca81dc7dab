//! Binary placeholder substitution.
//!
//! Byte buffers cannot travel inside a JSON body, so each `Binary` node is
//! replaced by a placeholder object `{"_placeholder":true,"num":k}` where `k`
//! is the buffer's 0-based append order into an ordered side-list. Buffers
//! then ride as separate binary frames after the text packet.

use bytes::Bytes;
use serde_json::json;

use crate::error::ProtocolError;
use crate::value::Value;

/// Walk the argument list depth-first, left to right, replacing each binary
/// buffer with a placeholder and appending the buffer to the side-list.
///
/// With no buffers present the output contains no placeholders and the
/// side-list is empty.
#[must_use]
pub fn deconstruct(args: &[Value]) -> (serde_json::Value, Vec<Bytes>) {
    let mut attachments = Vec::new();
    let tree = args
        .iter()
        .map(|v| substitute(v, &mut attachments))
        .collect();
    (serde_json::Value::Array(tree), attachments)
}

/// Count the binary buffers in an argument list without building the tree.
#[must_use]
pub fn count_binary(args: &[Value]) -> usize {
    fn count(value: &Value) -> usize {
        match value {
            Value::Binary(_) => 1,
            Value::Array(items) => items.iter().map(count).sum(),
            Value::Object(entries) => entries.iter().map(|(_, v)| count(v)).sum(),
            _ => 0,
        }
    }
    args.iter().map(count).sum()
}

/// Rebuild the argument list from a JSON tree and the collected side-list,
/// replacing each placeholder with `attachments[num]`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if a placeholder index is out
/// of range or the tree is not a JSON array.
pub fn reconstruct(
    tree: &serde_json::Value,
    attachments: &[Bytes],
) -> Result<Vec<Value>, ProtocolError> {
    let items = tree
        .as_array()
        .ok_or_else(|| ProtocolError::MalformedPayload("argument body is not an array".into()))?;

    items.iter().map(|v| resolve(v, attachments)).collect()
}

fn substitute(value: &Value, attachments: &mut Vec<Bytes>) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Binary(buf) => {
            let num = attachments.len();
            attachments.push(buf.clone());
            json!({ "_placeholder": true, "num": num })
        }
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| substitute(v, attachments)).collect(),
        ),
        Value::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), substitute(v, attachments));
            }
            serde_json::Value::Object(map)
        }
    }
}

fn resolve(json: &serde_json::Value, attachments: &[Bytes]) -> Result<Value, ProtocolError> {
    match json {
        serde_json::Value::Object(map) => {
            if map.get("_placeholder").and_then(serde_json::Value::as_bool) == Some(true) {
                let num = map
                    .get("num")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| {
                        ProtocolError::MalformedPayload("placeholder without num".into())
                    })? as usize;
                let buf = attachments.get(num).ok_or_else(|| {
                    ProtocolError::MalformedPayload(format!(
                        "placeholder index {num} out of range ({} attachments)",
                        attachments.len()
                    ))
                })?;
                return Ok(Value::Binary(buf.clone()));
            }
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((k.clone(), resolve(v, attachments)?));
            }
            Ok(Value::Object(entries))
        }
        serde_json::Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| resolve(v, attachments))
                .collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => Ok(Value::Number(n.clone())),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
    }
}
