//! JSON command messages and msgpack result payloads.

use crate::error::ProtocolError;
use serde_json::{json, Map, Value};

/// Key carrying the protocol version in every command message.
pub const PROTOCOL_VERSION_TAG: &str = "VERSION";

/// Oldest server protocol version this client can talk to.
pub const MIN_COMPATIBLE_PROTOCOL_VERSION: i64 = 4;

/// Protocol version this client speaks.
pub const CURRENT_PROTOCOL_VERSION: i64 = 4;

/// Operation names understood by the server's command socket.
pub mod commands {
    pub const STREAM: &str = "stream";
    pub const MODEL_ZOO: &str = "modelzoo";
    pub const SLEEP: &str = "sleep";
    pub const SHUTDOWN: &str = "shutdown";
    pub const LABEL_DICT: &str = "label_dictionary";
    pub const SYSTEM_INFO: &str = "system_info";
    pub const TRACE_MANAGE: &str = "trace_manage";
    pub const ZOO_MANAGE: &str = "zoo_manage";
}

const UNSPECIFIED_ERROR: &str = "unspecified error";

/// Build a bare `{"op": op}` request.
pub fn request(op: &str) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("op".into(), Value::from(op));
    request
}

/// Control message opening a stream for `model_name`.
pub fn stream_request(model_name: &str, frame_queue_depth: usize, config: &Value) -> Value {
    let mut request = request(commands::STREAM);
    request.insert("name".into(), Value::from(model_name));
    request.insert("frame_queue_depth".into(), Value::from(frame_queue_depth));
    if !is_empty(config) {
        request.insert("config".into(), config.clone());
    }
    Value::Object(request)
}

/// Management request carrying arbitrary arguments under `args`.
pub fn managed_request(op: &str, args: &Value) -> Value {
    json!({ "op": op, "args": args })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Stamp the current protocol version (unless one is present) and
/// serialize to JSON bytes.
pub fn prepare(message: &Value) -> Result<Vec<u8>, ProtocolError> {
    match message {
        Value::Object(map) if !map.contains_key(PROTOCOL_VERSION_TAG) => {
            let mut stamped = map.clone();
            stamped.insert(
                PROTOCOL_VERSION_TAG.into(),
                Value::from(CURRENT_PROTOCOL_VERSION),
            );
            Ok(serde_json::to_vec(&stamped)?)
        }
        other => Ok(serde_json::to_vec(other)?),
    }
}

/// Outcome of validating the protocol version of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    Compatible(i64),
    NotAnObject,
    Missing,
    Unsupported(Value),
}

pub fn check_version(response: &Value) -> VersionCheck {
    let Some(map) = response.as_object() else {
        return VersionCheck::NotAnObject;
    };
    match map.get(PROTOCOL_VERSION_TAG) {
        None => VersionCheck::Missing,
        Some(version) => match version.as_i64() {
            Some(v)
                if (MIN_COMPATIBLE_PROTOCOL_VERSION..=CURRENT_PROTOCOL_VERSION).contains(&v) =>
            {
                VersionCheck::Compatible(v)
            }
            _ => VersionCheck::Unsupported(version.clone()),
        },
    }
}

/// Return the server-reported error message if `response` carries
/// `"success": false`.
pub fn error_check(response: &Value) -> Option<String> {
    let success = response.get("success")?;
    if success.as_bool().unwrap_or(true) {
        return None;
    }
    let msg = response
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or(UNSPECIFIED_ERROR);
    Some(msg.to_string())
}

/// Decode a msgpack result payload into a JSON-like tree.
pub fn decode_result(payload: &[u8]) -> Result<Value, ProtocolError> {
    Ok(rmp_serde::from_slice(payload)?)
}

/// Encode a JSON-like tree as msgpack, with maps keyed by field name.
pub fn encode_result(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(value)?)
}
