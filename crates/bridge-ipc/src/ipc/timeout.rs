//! Races a pending call against its timer.
//!
//! ```text
//! Waiting ──response──▶ Resolved
//!    │    ──rejection─▶ Rejected
//!    └────timer───────▶ TimedOut
//! ```
//!
//! All three end states are terminal. The timer is armed when the call is
//! created, so the channel write and the wait share one deadline. Dropping a
//! call that is still `Waiting` cancels its entry in the table.

use crate::domain::error::{IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use crate::ipc::pending::{CallOutcome, CorrelationTable};
use bridge_telemetry::IPC_TIMEOUTS;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

/// Stand-in deadline for timeouts too large to add to `now`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of one timed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Waiting,
    Resolved,
    Rejected,
    TimedOut,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallState::Waiting)
    }
}

/// Result of a settled race
#[derive(Debug)]
pub struct Settled {
    pub state: CallState,
    pub outcome: IpcResult<Value>,
    pub elapsed: Duration,
}

/// A call registered in the correlation table, waiting on its receiver
pub struct TimedCall<'a> {
    table: &'a CorrelationTable,
    id: RequestId,
    method: String,
    timeout: Duration,
    started: Instant,
    deadline: Instant,
    state: CallState,
}

impl<'a> TimedCall<'a> {
    pub fn new(
        table: &'a CorrelationTable,
        id: RequestId,
        method: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let started = Instant::now();
        Self {
            table,
            id,
            method: method.into(),
            timeout,
            started,
            deadline: started
                .checked_add(timeout)
                .unwrap_or_else(|| started + FAR_FUTURE),
            state: CallState::Waiting,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Run `fut` under the call's deadline. `None` if the deadline passed
    /// first; the following `wait` then reports the timeout.
    pub async fn within<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout_at(self.deadline, fut).await.ok()
    }

    /// Give up on the call and drop its entry.
    pub fn abandon(mut self) {
        self.table.cancel(&self.id);
        self.state = CallState::Rejected;
    }

    /// Wait for the outcome or the timer, whichever comes first.
    pub async fn wait(mut self, mut rx: oneshot::Receiver<CallOutcome>) -> Settled {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut rx).await {
            Ok(Ok(outcome)) => self.settle(outcome),
            Ok(Err(_)) => {
                self.state = CallState::Rejected;
                Err(IpcError::disconnected(format!(
                    "Response channel closed for request '{}'",
                    self.method
                )))
            }
            Err(_) => {
                if self.table.expire(&self.id) {
                    IPC_TIMEOUTS.inc();
                    self.state = CallState::TimedOut;
                    Err(IpcError::timeout(&self.method, self.timeout))
                } else {
                    // The entry was settled just as the timer fired
                    match rx.try_recv() {
                        Ok(outcome) => self.settle(outcome),
                        Err(_) => {
                            self.state = CallState::TimedOut;
                            Err(IpcError::timeout(&self.method, self.timeout))
                        }
                    }
                }
            }
        };

        Settled {
            state: self.state,
            outcome,
            elapsed: self.started.elapsed(),
        }
    }

    fn settle(&mut self, outcome: CallOutcome) -> CallOutcome {
        self.state = if outcome.is_ok() {
            CallState::Resolved
        } else {
            CallState::Rejected
        };
        outcome
    }
}

impl Drop for TimedCall<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.table.cancel(&self.id) {
            warn!(request_id = %self.id, method = %self.method, "Call abandoned, entry removed");
        }
    }
}
