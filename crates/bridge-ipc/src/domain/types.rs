//! Caller-facing option and diagnostic types.

use crate::domain::config::{humantime_serde, optional_humantime_serde};
use crate::domain::request_id::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Queue priority. Higher runs first; equal priorities keep arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Lifecycle of a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Executing => "EXECUTING",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Cancelled => "CANCELLED",
            RequestStatus::Retrying => "RETRYING",
        };
        f.write_str(s)
    }
}

/// Per-call options for `invoke`.
///
/// Setting a priority or any retry field routes the call through the priority
/// queue. The retry fields override the queue's default policy for this
/// request; a queued call without a priority runs at `Normal`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeOptions {
    #[serde(with = "optional_humantime_serde")]
    pub timeout: Option<Duration>,
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
    #[serde(with = "optional_humantime_serde")]
    pub retry_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// True if the call goes through the priority queue
    pub fn is_queued(&self) -> bool {
        self.priority.is_some()
            || self.max_retries.is_some()
            || self.retry_delay.is_some()
            || self.backoff_multiplier.is_some()
    }
}

/// Snapshot of a queued request for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct QueuedRequestInfo {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
    pub priority: Priority,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "optional_humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Queue statistics.
///
/// `total`, `pending`, `executing` and `retrying` count requests currently
/// held; `completed` and `failed` are lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub executing: usize,
    pub completed: u64,
    pub failed: u64,
    pub retrying: usize,
}
