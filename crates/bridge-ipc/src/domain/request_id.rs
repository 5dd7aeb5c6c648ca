//! Request ID used to correlate a request with its response.
//!
//! Locally generated IDs are UUID v7 rendered as 32 lowercase hex characters.
//! IDs chosen by the backend for its own requests are arbitrary strings and
//! are echoed back unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation token linking a request envelope to its response.
///
/// Uses UUID v7 for generated IDs which is time-ordered, making it ideal for:
/// - Log correlation
/// - Request/response matching across a sync-then-push reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Wrap an ID received from the wire
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Milliseconds since the Unix epoch, if this is a generated (v7) ID
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = Uuid::try_parse(&self.0).ok()?;
        if uuid.get_version_num() != 7 {
            return None;
        }
        // UUID v7 encodes the timestamp in the first 48 bits
        let bytes = uuid.as_bytes();
        let ts = bytes[..6]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Some(ts)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
