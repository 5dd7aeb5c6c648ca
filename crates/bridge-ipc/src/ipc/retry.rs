//! Retry controller for the direct call path.
//!
//! Repeats a call while the backend answers with a retryable code (by default
//! `SYSTEM_NOT_READY`), sleeping between attempts, until the attempt limit or
//! the wall-clock budget runs out. The last response is then returned as is.

use crate::domain::error::IpcResult;
use crate::domain::retry_policy::RetryPolicy;
use bridge_telemetry::IPC_RETRIES;
use serde_json::Value;
use std::future::Future;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails for a non-retryable reason, or
    /// the policy gives up.
    pub async fn run<F, Fut>(&self, method: &str, mut attempt: F) -> IpcResult<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IpcResult<Value>>,
    {
        let started = Instant::now();
        let mut retries = 0u32;

        loop {
            let result = attempt().await;
            let error = match &result {
                Ok(_) => return result,
                Err(e) if !self.policy.is_retryable(e) => return result,
                Err(e) => e,
            };

            if retries >= self.policy.max_retries {
                warn!(
                    method = method,
                    retries = retries,
                    code = %error.code,
                    "Giving up after max retries, backend still not ready"
                );
                return result;
            }

            let delay = self.policy.delay_for(retries);
            if !self.policy.within_budget(started.elapsed() + delay) {
                warn!(
                    method = method,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Retry budget exhausted, giving up"
                );
                return result;
            }

            info!(
                method = method,
                code = %error.code,
                delay_ms = delay.as_millis() as u64,
                attempt = retries + 1,
                max_retries = self.policy.max_retries,
                "Backend not ready, retrying"
            );
            IPC_RETRIES.with_label_values(&["direct"]).inc();
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}
