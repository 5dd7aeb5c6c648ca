//! Retry policy shared by the direct call path and the priority queue.
//!
//! A policy answers three questions: is this error worth another attempt,
//! how long to wait before it, and is there budget left for it.

use crate::domain::config::{humantime_serde, optional_humantime_serde};
use crate::domain::error::{codes, IpcError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which errors a policy considers transient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOn {
    /// Error codes that qualify for a retry
    pub codes: Vec<String>,
    /// Case-sensitive substrings of the error message that qualify for a retry
    pub message_substrings: Vec<String>,
}

impl Default for RetryOn {
    fn default() -> Self {
        Self {
            codes: vec![codes::SYSTEM_NOT_READY.to_string()],
            message_substrings: Vec::new(),
        }
    }
}

impl RetryOn {
    /// Codes the queue retries by default
    pub fn transient() -> Self {
        Self {
            codes: [
                codes::NETWORK_ERROR,
                codes::TIMEOUT_ERROR,
                codes::SYSTEM_INITIALIZING,
                codes::CONNECTION_ERROR,
                codes::TEMPORARY_ERROR,
                codes::SYSTEM_NOT_READY,
                codes::SYSTEM_NOT_READY_TIMEOUT,
                codes::SYSTEM_CHECK_ERROR,
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            message_substrings: vec!["timeout".to_string(), "network".to_string()],
        }
    }

    pub fn matches(&self, error: &IpcError) -> bool {
        self.codes.iter().any(|c| *c == error.code)
            || self
                .message_substrings
                .iter()
                .any(|s| error.message.contains(s.as_str()))
    }
}

/// Retry policy: predicate, attempt limit, backoff and wall-clock budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Errors that qualify for a retry
    pub retry_on: RetryOn,
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Factor applied to the delay per completed retry
    pub backoff_multiplier: f64,
    /// Total time after which no further retry is started
    #[serde(with = "optional_humantime_serde")]
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::system_not_ready()
    }
}

impl RetryPolicy {
    /// Direct path: wait out a backend that is still starting up.
    pub fn system_not_ready() -> Self {
        Self {
            retry_on: RetryOn::default(),
            max_retries: 60,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 1.0,
            max_elapsed: Some(Duration::from_secs(60)),
        }
    }

    /// Queue path: generic transient failures with a short exponential backoff.
    pub fn queue_default() -> Self {
        Self {
            retry_on: RetryOn::transient(),
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 1.5,
            max_elapsed: None,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self {
            retry_on: RetryOn {
                codes: Vec::new(),
                message_substrings: Vec::new(),
            },
            max_retries: 0,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_elapsed: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// True if `error` qualifies for a retry under this policy
    pub fn is_retryable(&self, error: &IpcError) -> bool {
        self.retry_on.matches(error)
    }

    /// True if another retry may start after `retries_done` retries and `elapsed` time
    pub fn allows_retry(&self, retries_done: u32, elapsed: Duration) -> bool {
        retries_done < self.max_retries && self.within_budget(elapsed)
    }

    pub fn within_budget(&self, elapsed: Duration) -> bool {
        self.max_elapsed.map_or(true, |budget| elapsed <= budget)
    }

    /// Delay before the retry that follows `retries_done` completed retries:
    /// `base_delay * backoff_multiplier ^ retries_done`.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retries_done as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
