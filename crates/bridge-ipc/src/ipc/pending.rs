//! Correlation table: maps an outstanding request id to its waiting caller.
//!
//! Flow:
//! 1. The transport generates the request id
//! 2. It calls `register()` to get a oneshot receiver
//! 3. It writes the request envelope to the channel
//! 4. A terminal response (immediate reply or later push) calls `resolve()`
//! 5. The caller awaits the receiver or times out and calls `expire()`
//!
//! Every exit path removes the entry under the lock before delivering, so an
//! id is settled at most once and a late response or timer finds nothing.

use crate::domain::envelope::ResponseEnvelope;
use crate::domain::error::{IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use bridge_telemetry::{IPC_PENDING_ENTRIES, IPC_RESPONSES_RECEIVED};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a waiting caller receives
pub type CallOutcome = IpcResult<Value>;

/// A request waiting for its terminal response
struct PendingEntry {
    /// Channel to deliver the outcome
    sender: oneshot::Sender<CallOutcome>,
    /// When the request was registered
    created_at: Instant,
    /// Method name (for logging)
    method: String,
    /// Backend acknowledged with a `pending` response
    acknowledged: bool,
}

/// Statistics for the correlation table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests settled by a response or rejection
    pub total_completed: AtomicU64,
    /// Total requests removed by their timer
    pub total_timeouts: AtomicU64,
    /// Total requests removed without delivery
    pub total_cancelled: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub cancelled: u64,
}

pub struct CorrelationTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
    max_pending: usize,
    stats: PendingStats,
}

impl CorrelationTable {
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_pending,
            stats: PendingStats::default(),
        }
    }

    /// Register a pending request and get a receiver for its outcome.
    ///
    /// Fails with `QUEUE_FULL` at capacity and `PROTOCOL_ERROR` for an id
    /// that is already pending.
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
    ) -> IpcResult<oneshot::Receiver<CallOutcome>> {
        let (tx, rx) = oneshot::channel();
        let depth = {
            let mut entries = self.entries.lock();
            if entries.len() >= self.max_pending {
                warn!(
                    request_id = %id,
                    method = method,
                    limit = self.max_pending,
                    "Pending requests limit exceeded"
                );
                return Err(IpcError::queue_full(
                    "Pending request table",
                    self.max_pending,
                    method,
                ));
            }
            if entries.contains_key(&id) {
                return Err(IpcError::protocol_error(format!(
                    "request id {} is already pending",
                    id
                )));
            }
            entries.insert(
                id.clone(),
                PendingEntry {
                    sender: tx,
                    created_at: Instant::now(),
                    method: method.to_string(),
                    acknowledged: false,
                },
            );
            entries.len()
        };

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        IPC_PENDING_ENTRIES.set(depth as f64);
        debug!(request_id = %id, method = method, "Registered pending request");
        Ok(rx)
    }

    /// Deliver a terminal response. Returns false for an unknown or settled id.
    pub fn resolve(&self, response: ResponseEnvelope) -> bool {
        let id = response.id.clone();
        let status = if response.error.is_some() { "error" } else { "success" };
        let delivered = self.settle(&id, response.into_result());
        if delivered {
            IPC_RESPONSES_RECEIVED.with_label_values(&[status]).inc();
        }
        delivered
    }

    /// Fail a pending request. Returns false for an unknown or settled id.
    pub fn reject(&self, id: &RequestId, error: IpcError) -> bool {
        self.settle(id, Err(error))
    }

    /// Remove without delivering. Used when the write itself failed.
    pub fn cancel(&self, id: &RequestId) -> bool {
        if self.take(id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove an entry whose timer fired. False if a response got there first.
    pub fn expire(&self, id: &RequestId) -> bool {
        match self.take(id) {
            Some(entry) => {
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %id,
                    method = entry.method,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "Pending request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Record a `pending` acknowledgement. False for an unknown id.
    pub fn acknowledge(&self, id: &RequestId) -> bool {
        match self.entries.lock().get_mut(id) {
            Some(entry) => {
                entry.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with a clone of `error`.
    pub fn reject_all(&self, error: IpcError) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = self.entries.lock().drain().collect();
        IPC_PENDING_ENTRIES.set(0.0);
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, method = entry.method, code = %error.code, "Rejecting pending request");
            let _ = entry.sender.send(Err(error.clone()));
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        }
        count
    }

    fn settle(&self, id: &RequestId, outcome: CallOutcome) -> bool {
        let Some(entry) = self.take(id) else {
            debug!(request_id = %id, "Response for unknown or settled request id");
            return false;
        };

        let response_time = entry.created_at.elapsed();
        match entry.sender.send(outcome) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = %id,
                    method = entry.method,
                    acknowledged = entry.acknowledged,
                    response_time_ms = response_time.as_millis() as u64,
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                // Caller stopped waiting
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %id, method = entry.method, "Pending request receiver dropped");
                false
            }
        }
    }

    fn take(&self, id: &RequestId) -> Option<PendingEntry> {
        let (entry, depth) = {
            let mut entries = self.entries.lock();
            let entry = entries.remove(id);
            (entry, entries.len())
        };
        if entry.is_some() {
            IPC_PENDING_ENTRIES.set(depth as f64);
        }
        entry
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if a request id is pending
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// True if the backend acknowledged `id` with a `pending` response
    pub fn is_acknowledged(&self, id: &RequestId) -> bool {
        self.entries.lock().get(id).is_some_and(|e| e.acknowledged)
    }

    pub fn stats(&self) -> PendingSnapshot {
        PendingSnapshot {
            pending: self.pending_count(),
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
        }
    }
}
