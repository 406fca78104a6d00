//! JSON-RPC 2.0 envelopes as framed on an MCP stdio transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TransportError;

pub const JSONRPC_VERSION: &str = "2.0";
/// Correlation id carried by every request; calls are single-flight.
pub const FIXED_REQUEST_ID: u64 = 1;

/// Outbound request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: FIXED_REQUEST_ID,
        }
    }

    /// One line of JSON, newline-terminated.
    pub fn to_line(&self) -> Result<String, TransportError> {
        let mut line = serde_json::to_string(self).map_err(TransportError::Encode)?;
        line.push('\n');
        Ok(line)
    }
}

/// Error object inside a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// What one inbound line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Result(Value),
    Error(RpcErrorObject),
    /// Server-initiated message with a method and no id; not a reply.
    Notification(String),
}

/// Classify one inbound line.
///
/// A line that is not JSON is a decode error; a JSON object with neither
/// `result` nor `error` (and not a notification) is a protocol error.
pub fn decode_line(line: &str) -> Result<Inbound, TransportError> {
    let value: Value =
        serde_json::from_str(line).map_err(|source| TransportError::Decode {
            line: line.to_string(),
            source,
        })?;
    let Some(object) = value.as_object() else {
        return Err(TransportError::Protocol(format!(
            "expected a JSON object, got: {line}"
        )));
    };

    if let Some(error) = object.get("error") {
        let error = match serde_json::from_value::<RpcErrorObject>(error.clone()) {
            Ok(parsed) => parsed,
            Err(_) => RpcErrorObject {
                code: 0,
                message: error.to_string(),
                data: None,
            },
        };
        return Ok(Inbound::Error(error));
    }
    if let Some(result) = object.get("result") {
        return Ok(Inbound::Result(result.clone()));
    }
    if let (Some(method), None) = (object.get("method").and_then(Value::as_str), object.get("id"))
    {
        return Ok(Inbound::Notification(method.to_string()));
    }
    Err(TransportError::Protocol(format!(
        "response has neither `result` nor `error`: {line}"
    )))
}
