//! IPC error types with string error codes.
//!
//! The code travels on the wire inside the response envelope's `error`
//! object. Codes produced by the backend are passed through unchanged; the
//! constants below are the ones this crate produces or reacts to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error codes
pub mod codes {
    // Transport errors
    pub const INIT_ERROR: &str = "INIT_ERROR";
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";
    pub const SEND_ERROR: &str = "SEND_ERROR";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const DISCONNECTED: &str = "DISCONNECTED";

    // Admission control
    pub const QUEUE_FULL: &str = "QUEUE_FULL";
    pub const CANCELLED: &str = "CANCELLED";

    // Inbound dispatch
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";

    // Boundary validation
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";

    // Backend still starting up
    pub const SYSTEM_NOT_READY: &str = "SYSTEM_NOT_READY";
    pub const SYSTEM_NOT_READY_TIMEOUT: &str = "SYSTEM_NOT_READY_TIMEOUT";
    pub const SYSTEM_INITIALIZING: &str = "SYSTEM_INITIALIZING";
    pub const SYSTEM_CHECK_ERROR: &str = "SYSTEM_CHECK_ERROR";

    // Transient network conditions
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const CONNECTION_ERROR: &str = "CONNECTION_ERROR";
    pub const TEMPORARY_ERROR: &str = "TEMPORARY_ERROR";
}

/// Structured IPC error: `{ code, message, details? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcError {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IpcError {
    /// Create a new IPC error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create error with additional data
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    /// Channel was not attached within the initialization bound
    pub fn init_error(details: impl Into<String>) -> Self {
        Self::new(
            codes::INIT_ERROR,
            format!("IPC not initialized: {}", details.into()),
        )
    }

    /// Per-call wall-clock bound exceeded
    pub fn timeout(method: &str, elapsed: Duration) -> Self {
        Self::with_details(
            codes::TIMEOUT_ERROR,
            format!(
                "Request '{}' timed out after {}ms ({}s)",
                method,
                elapsed.as_millis(),
                elapsed.as_secs_f64()
            ),
            serde_json::json!({ "timeout_ms": elapsed.as_millis() as u64 }),
        )
    }

    /// Synchronous failure writing to the channel
    pub fn send_error(details: impl Into<String>) -> Self {
        Self::new(
            codes::SEND_ERROR,
            format!("Failed to send request: {}", details.into()),
        )
    }

    /// Malformed or unclassifiable message on the wire
    pub fn protocol_error(details: impl Into<String>) -> Self {
        Self::new(
            codes::PROTOCOL_ERROR,
            format!("Protocol error: {}", details.into()),
        )
    }

    /// Channel went away while the request was outstanding
    pub fn disconnected(details: impl Into<String>) -> Self {
        Self::new(codes::DISCONNECTED, details.into())
    }

    /// Admission rejected because a bounded structure is full
    pub fn queue_full(what: &str, limit: usize, method: &str) -> Self {
        Self::with_details(
            codes::QUEUE_FULL,
            format!(
                "{} is full ({} requests). Cannot accept request: {}",
                what, limit, method
            ),
            serde_json::json!({ "limit": limit }),
        )
    }

    /// Request was cancelled before it produced a result
    pub fn cancelled(method: &str) -> Self {
        Self::new(
            codes::CANCELLED,
            format!("Request cancelled: {}", method),
        )
    }

    /// No inbound handler registered for the method
    pub fn handler_not_found(method: &str) -> Self {
        Self::new(
            codes::HANDLER_NOT_FOUND,
            format!("No handler registered for method '{}'", method),
        )
    }

    /// Inbound handler failed
    pub fn handler_error(details: impl Into<String>) -> Self {
        Self::new(codes::HANDLER_ERROR, details.into())
    }

    /// Method is not in the configured registry
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            codes::UNKNOWN_METHOD,
            format!("Method not registered: {}", method),
        )
    }

    /// Params or result did not match the expected schema
    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_PAYLOAD,
            format!("Invalid payload: {}", details.into()),
        )
    }

    /// Check the error code
    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for IpcError {}

impl From<serde_json::Error> for IpcError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            IpcError::protocol_error(e.to_string())
        } else {
            IpcError::invalid_payload(e.to_string())
        }
    }
}

/// Result type for IPC operations
pub type IpcResult<T> = Result<T, IpcError>;

/// Bridge-level errors (setup and lifecycle, not carried on the wire)
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// Handler registered for a method outside the closed registry
    #[error("method '{0}' is not in the inbound method registry")]
    UnregisteredMethod(String),

    /// Channel could not be established
    #[error("channel error: {0}")]
    Channel(#[from] crate::channel::ChannelError),

    /// Client was disposed
    #[error("client disposed")]
    Disposed,
}
