//! Bridge configuration with validation.
//!
//! Durations are written in human form (`"60s"`, `"500ms"`, `"3m"`); every
//! section has defaults so an empty document is a valid configuration.

use crate::domain::retry_policy::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Call and initialization timeouts
    pub timeouts: TimeoutConfig,
    /// Capacity limits
    pub limits: LimitsConfig,
    /// Retry policies for the direct and queued paths
    pub retry: RetryConfig,
    /// Closed method registries
    pub methods: MethodsConfig,
    /// WebSocket channel settings
    pub websocket: WebSocketConfig,
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.default.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.init.is_zero() {
            return Err(ConfigError::InvalidTimeout("init timeout cannot be 0".into()));
        }

        if let Some((method, _)) = self
            .timeouts
            .method_overrides
            .iter()
            .find(|(_, d)| d.is_zero())
        {
            return Err(ConfigError::InvalidTimeout(format!(
                "timeout override for '{}' cannot be 0",
                method
            )));
        }

        if self.limits.max_pending == 0 {
            return Err(ConfigError::InvalidLimit("max_pending cannot be 0".into()));
        }

        if self.limits.max_queue == 0 {
            return Err(ConfigError::InvalidLimit("max_queue cannot be 0".into()));
        }

        if self.limits.max_concurrency == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_concurrency cannot be 0".into(),
            ));
        }

        for (name, policy) in [
            ("system_not_ready", &self.retry.system_not_ready),
            ("queue", &self.retry.queue),
        ] {
            if !valid_multiplier(policy.backoff_multiplier) {
                return Err(ConfigError::InvalidRetry(format!(
                    "{} backoff_multiplier must be positive",
                    name
                )));
            }
        }

        if !valid_multiplier(self.websocket.backoff_multiplier) {
            return Err(ConfigError::InvalidRetry(
                "websocket backoff_multiplier must be positive".into(),
            ));
        }

        if self.websocket.ping_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "websocket ping_interval cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }
}

fn valid_multiplier(multiplier: f64) -> bool {
    multiplier.is_finite() && multiplier > 0.0
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-call timeout when the caller does not choose one
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    /// How long a call waits for a channel to be attached
    #[serde(with = "humantime_serde")]
    pub init: Duration,
    /// Per-method floors; the effective timeout is never below these
    #[serde(with = "humantime_map_serde")]
    pub method_overrides: HashMap<String, Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(60),
            init: Duration::from_secs(5),
            method_overrides: HashMap::from([("login".to_string(), Duration::from_secs(180))]),
        }
    }
}

impl TimeoutConfig {
    /// Effective timeout for `method`, given an optional caller request
    pub fn timeout_for(&self, method: &str, requested: Option<Duration>) -> Duration {
        let base = requested.unwrap_or(self.default);
        match self.method_overrides.get(method) {
            Some(floor) => base.max(*floor),
            None => base,
        }
    }
}

/// Capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max entries in the correlation table
    pub max_pending: usize,
    /// Max requests held by the priority queue
    pub max_queue: usize,
    /// Max queued requests executing at once
    pub max_concurrency: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pending: 1000,
            max_queue: 500,
            max_concurrency: 5,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Direct path retry on `SYSTEM_NOT_READY`
    pub system_not_ready: RetryPolicy,
    /// Default policy for queued requests
    pub queue: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            system_not_ready: RetryPolicy::system_not_ready(),
            queue: RetryPolicy::queue_default(),
        }
    }
}

/// Closed method registries. `None` means unrestricted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodsConfig {
    /// Methods the backend may call on us
    pub inbound: Option<Vec<String>>,
    /// Methods we may call on the backend
    pub outbound: Option<Vec<String>>,
}

impl MethodsConfig {
    pub fn inbound_allowed(&self, method: &str) -> bool {
        Self::allowed(&self.inbound, method)
    }

    pub fn outbound_allowed(&self, method: &str) -> bool {
        Self::allowed(&self.outbound, method)
    }

    fn allowed(list: &Option<Vec<String>>, method: &str) -> bool {
        list.as_ref().map_or(true, |l| l.iter().any(|m| m == method))
    }
}

/// WebSocket channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Backend URL
    pub url: String,
    /// Reconnect attempts after a drop before giving up
    pub reconnect_attempts: u32,
    /// Delay before the first reconnect
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Factor applied to the delay per failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound for the reconnect delay
    #[serde(with = "humantime_serde")]
    pub max_reconnect_delay: Duration,
    /// Keep-alive ping interval
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Outbound message buffer size
    pub message_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_reconnect_delay: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            message_buffer_size: 256,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid retry or backoff setting
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),
    /// Document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// File could not be read
    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// Humantime serde module for Duration serialization
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() == 0 && duration.as_secs() > 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

/// Same as `humantime_serde` for `Option<Duration>`; `null` means unbounded
pub(crate) mod optional_humantime_serde {
    use super::humantime_serde::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// `method -> duration` maps with human-readable values
pub(crate) mod humantime_map_serde {
    use super::humantime_serde::{format_duration, parse_duration};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &HashMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (method, duration) in map {
            out.serialize_entry(method, &format_duration(*duration))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        HashMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(method, s)| {
                parse_duration(&s)
                    .map(|d| (method, d))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
