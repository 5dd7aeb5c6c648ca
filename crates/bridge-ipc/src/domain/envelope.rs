//! Wire envelopes and their JSON codec.
//!
//! Every message on the channel is a JSON object tagged by `type`:
//!
//! ```text
//! request:  { id, type: "request",  method, params?, meta?, timestamp }
//! response: { id, type: "response", status, result?, error?, timestamp }
//! ```
//!
//! A response with `status: "pending"` is an acknowledgement only; the
//! terminal `success`/`error` response for the same id arrives later as a push.

use crate::domain::error::{IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Request envelope (frontend → backend, or backend → frontend for pushes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(default, with = "lenient_millis")]
    pub timestamp: i64,
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Pending,
}

impl ResponseStatus {
    /// `success` and `error` end the exchange; `pending` does not
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseStatus::Pending)
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    #[serde(default, with = "lenient_millis")]
    pub timestamp: i64,
}

impl ResponseEnvelope {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Error code if this is an error response
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Collapse a terminal response into the caller-facing result.
    pub fn into_result(self) -> IpcResult<Value> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Error => Err(self.error.unwrap_or_else(|| {
                IpcError::protocol_error(format!("error response {} without error body", self.id))
            })),
            ResponseStatus::Pending => Err(IpcError::protocol_error(format!(
                "response {} is still pending",
                self.id
            ))),
        }
    }
}

/// Any message on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

/// Borrowed view used for encoding without cloning
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EnvelopeRef<'a> {
    Request(&'a RequestEnvelope),
    Response(&'a ResponseEnvelope),
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Build a request envelope with a freshly generated ID.
pub fn create_request(
    method: impl Into<String>,
    params: Option<Value>,
    meta: Option<Map<String, Value>>,
) -> RequestEnvelope {
    RequestEnvelope {
        id: RequestId::generate(),
        method: method.into(),
        params,
        meta,
        timestamp: now_ms(),
    }
}

/// Build a terminal success response echoing `id`.
pub fn create_success_response(id: RequestId, result: Value) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        status: ResponseStatus::Success,
        result: Some(result),
        error: None,
        timestamp: now_ms(),
    }
}

/// Build a terminal error response echoing `id`.
pub fn create_error_response(
    id: RequestId,
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<Value>,
) -> ResponseEnvelope {
    let mut error = IpcError::new(code, message);
    error.details = details;
    error_response(id, error)
}

/// Build a terminal error response from an existing error.
pub fn error_response(id: RequestId, error: IpcError) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        status: ResponseStatus::Error,
        result: None,
        error: Some(error),
        timestamp: now_ms(),
    }
}

/// Build a non-terminal acknowledgement for `id`.
pub fn create_pending_response(id: RequestId) -> ResponseEnvelope {
    ResponseEnvelope {
        id,
        status: ResponseStatus::Pending,
        result: None,
        error: None,
        timestamp: now_ms(),
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// True if the value looks like a response envelope.
///
/// Checks the `type` tag; untagged objects carrying a `status` are accepted
/// as responses too.
pub fn is_response(value: &Value) -> bool {
    match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind == "response",
        None => value.get("status").is_some() && value.get("id").is_some(),
    }
}

/// True if the value is tagged as a request envelope.
pub fn is_request(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("request")
}

/// Decode one raw message. Never panics; malformed input is a `PROTOCOL_ERROR`.
pub fn decode(raw: &str) -> IpcResult<Envelope> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| IpcError::protocol_error(e.to_string()))?;
    decode_value(value)
}

/// Decode an already parsed JSON value.
pub fn decode_value(value: Value) -> IpcResult<Envelope> {
    if is_response(&value) {
        serde_json::from_value(value)
            .map(Envelope::Response)
            .map_err(|e| IpcError::protocol_error(format!("malformed response: {}", e)))
    } else if is_request(&value) {
        serde_json::from_value(value)
            .map(Envelope::Request)
            .map_err(|e| IpcError::protocol_error(format!("malformed request: {}", e)))
    } else {
        Err(IpcError::protocol_error(
            "message is neither a request nor a response",
        ))
    }
}

/// Encode a request envelope.
pub fn encode_request(request: &RequestEnvelope) -> IpcResult<String> {
    Ok(serde_json::to_string(&EnvelopeRef::Request(request))?)
}

/// Encode a response envelope.
pub fn encode_response(response: &ResponseEnvelope) -> IpcResult<String> {
    Ok(serde_json::to_string(&EnvelopeRef::Response(response))?)
}

/// Timestamps arrive as integers from most peers and as floats from some.
mod lenient_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*ts)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
            serde_json::Value::Null => Ok(0),
            _ => Err(serde::de::Error::custom("timestamp must be a number")),
        }
    }
}
