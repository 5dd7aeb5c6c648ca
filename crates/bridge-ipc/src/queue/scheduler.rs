//! Bounded, priority-ordered, concurrency-limited request queue.
//!
//! Requests stay in the queue from admission until a terminal state:
//!
//! ```text
//! PENDING ──▶ EXECUTING ──▶ COMPLETED
//!    ▲            │
//!    │            ├──▶ RETRYING ──(delay)──┐
//!    └────────────┼────────────────────────┘
//!                 └──▶ FAILED
//! any non-terminal ──cancel──▶ CANCELLED
//! ```
//!
//! Every mutation and each scheduling pass happen under a single lock, so a
//! request is never picked twice and passes never interleave.

use crate::domain::error::{IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use crate::domain::retry_policy::RetryPolicy;
use crate::domain::types::{InvokeOptions, Priority, QueueStats, QueuedRequestInfo, RequestStatus};
use async_trait::async_trait;
use bridge_telemetry::{IPC_QUEUE_DEPTH, IPC_RETRIES};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Runs one attempt of a queued request
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> IpcResult<Value>;
}

struct QueuedRequest {
    id: RequestId,
    method: String,
    params: Option<Value>,
    priority: Priority,
    status: RequestStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    retry_count: u32,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    completion: Option<oneshot::Sender<IpcResult<Value>>>,
}

impl QueuedRequest {
    fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn settle(&mut self, outcome: IpcResult<Value>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }

    fn info(&self) -> QueuedRequestInfo {
        QueuedRequestInfo {
            id: self.id.clone(),
            method: self.method.clone(),
            params: self.params.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            retry_count: self.retry_count,
            max_retries: self.policy.max_retries,
            retry_delay: self.policy.base_delay,
            backoff_multiplier: self.policy.backoff_multiplier,
            timeout: self.timeout,
        }
    }
}

#[derive(Default)]
struct QueueState {
    requests: Vec<QueuedRequest>,
    active: usize,
    completed: u64,
    failed: u64,
}

impl QueueState {
    fn position(&self, id: &RequestId) -> Option<usize> {
        self.requests.iter().position(|r| &r.id == id)
    }

    fn publish_depth(&self) {
        IPC_QUEUE_DEPTH.set(self.requests.len() as f64);
    }
}

/// One attempt picked by a scheduling pass
struct Job {
    id: RequestId,
    method: String,
    params: Option<Value>,
    timeout: Option<Duration>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    executor: Arc<dyn RequestExecutor>,
    max_queue: usize,
    max_concurrency: usize,
    default_policy: RetryPolicy,
}

/// Handle to an admitted request
pub struct QueueTicket {
    pub id: RequestId,
    method: String,
    rx: oneshot::Receiver<IpcResult<Value>>,
}

impl QueueTicket {
    /// Wait for the request's single outcome.
    pub async fn wait(self) -> IpcResult<Value> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(IpcError::cancelled(&self.method)))
    }
}

#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        max_queue: usize,
        max_concurrency: usize,
        default_policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                executor,
                max_queue,
                max_concurrency,
                default_policy,
            }),
        }
    }

    /// Admit a request and wait for its outcome.
    pub async fn enqueue(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        options: InvokeOptions,
    ) -> IpcResult<Value> {
        self.submit(method, params, options)?.wait().await
    }

    /// Admit a request without waiting. Fails with `QUEUE_FULL` at capacity,
    /// leaving the queue untouched.
    pub fn submit(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        options: InvokeOptions,
    ) -> IpcResult<QueueTicket> {
        let method = method.into();
        let (tx, rx) = oneshot::channel();
        let id = RequestId::generate();

        let policy = {
            let mut policy = self.inner.default_policy.clone();
            if let Some(max_retries) = options.max_retries {
                policy.max_retries = max_retries;
            }
            if let Some(delay) = options.retry_delay {
                policy.base_delay = delay;
            }
            if let Some(multiplier) = options.backoff_multiplier {
                policy.backoff_multiplier = multiplier;
            }
            policy
        };
        let priority = options.priority.unwrap_or_default();

        {
            let mut state = self.inner.state.lock();
            if state.requests.len() >= self.inner.max_queue {
                warn!(method = %method, limit = self.inner.max_queue, "Request queue is full");
                return Err(IpcError::queue_full(
                    "Request queue",
                    self.inner.max_queue,
                    &method,
                ));
            }

            let now = Utc::now();
            state.requests.push(QueuedRequest {
                id: id.clone(),
                method: method.clone(),
                params,
                priority,
                status: RequestStatus::Pending,
                created_at: now,
                updated_at: now,
                retry_count: 0,
                policy,
                timeout: options.timeout,
                completion: Some(tx),
            });
            // Stable: equal priorities keep arrival order
            state.requests.sort_by(|a, b| b.priority.cmp(&a.priority));
            state.publish_depth();
        }

        debug!(request_id = %id, method = %method, priority = ?priority, "Request queued");
        self.inner.schedule();

        Ok(QueueTicket { id, method, rx })
    }

    /// Cancel a queued or executing request. An in-flight call is not
    /// interrupted; its eventual result is discarded.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let mut request = {
            let mut state = self.inner.state.lock();
            let Some(idx) = state.position(id) else {
                return false;
            };
            let request = state.requests.remove(idx);
            state.publish_depth();
            request
        };
        request.set_status(RequestStatus::Cancelled);
        info!(request_id = %id, method = %request.method, "Request cancelled");
        let method = request.method.clone();
        request.settle(Err(IpcError::cancelled(&method)));
        true
    }

    /// Cancel everything in the queue. Returns how many were cancelled.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedRequest> = {
            let mut state = self.inner.state.lock();
            let drained = state.requests.drain(..).collect();
            state.publish_depth();
            drained
        };
        let count = drained.len();
        for mut request in drained {
            request.set_status(RequestStatus::Cancelled);
            let method = request.method.clone();
            request.settle(Err(IpcError::cancelled(&method)));
        }
        if count > 0 {
            info!(count = count, "Request queue cleared");
        }
        count
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let count = |status: RequestStatus| state.requests.iter().filter(|r| r.status == status).count();
        QueueStats {
            total: state.requests.len(),
            pending: count(RequestStatus::Pending),
            executing: count(RequestStatus::Executing),
            completed: state.completed,
            failed: state.failed,
            retrying: count(RequestStatus::Retrying),
        }
    }

    /// Snapshot of every request currently held, in queue order
    pub fn all_requests(&self) -> Vec<QueuedRequestInfo> {
        self.inner.state.lock().requests.iter().map(QueuedRequest::info).collect()
    }

    pub fn requests_by_status(&self, status: RequestStatus) -> Vec<QueuedRequestInfo> {
        self.inner
            .state
            .lock()
            .requests
            .iter()
            .filter(|r| r.status == status)
            .map(QueuedRequest::info)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueInner {
    /// Start as many pending requests as the concurrency limit allows.
    fn schedule(self: &Arc<Self>) {
        let jobs = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut jobs = Vec::new();
            while state.active < self.max_concurrency {
                let Some(request) = state
                    .requests
                    .iter_mut()
                    .find(|r| r.status == RequestStatus::Pending)
                else {
                    break;
                };
                request.set_status(RequestStatus::Executing);
                state.active += 1;
                jobs.push(Job {
                    id: request.id.clone(),
                    method: request.method.clone(),
                    params: request.params.clone(),
                    timeout: request.timeout,
                });
            }
            jobs
        };

        for job in jobs {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run(job).await });
        }
    }

    async fn run(self: Arc<Self>, job: Job) {
        debug!(request_id = %job.id, method = %job.method, "Executing queued request");
        let result = self
            .executor
            .execute(&job.method, job.params, job.timeout)
            .await;
        self.finish(&job.id, result);
        self.schedule();
    }

    fn finish(self: &Arc<Self>, id: &RequestId, result: IpcResult<Value>) {
        let mut settled: Option<(QueuedRequest, IpcResult<Value>)> = None;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.active = state.active.saturating_sub(1);

            let Some(idx) = state.position(id) else {
                debug!(request_id = %id, "Discarding result of cancelled request");
                return;
            };

            match result {
                Ok(value) => {
                    let mut request = state.requests.remove(idx);
                    request.set_status(RequestStatus::Completed);
                    state.completed += 1;
                    state.publish_depth();
                    settled = Some((request, Ok(value)));
                }
                Err(e) => {
                    let request = &mut state.requests[idx];
                    if request.policy.is_retryable(&e)
                        && request.retry_count < request.policy.max_retries
                    {
                        let delay = request.policy.delay_for(request.retry_count);
                        request.retry_count += 1;
                        request.set_status(RequestStatus::Retrying);
                        info!(
                            request_id = %id,
                            method = %request.method,
                            code = %e.code,
                            delay_ms = delay.as_millis() as u64,
                            attempt = request.retry_count,
                            max_retries = request.policy.max_retries,
                            "Retrying queued request"
                        );
                        IPC_RETRIES.with_label_values(&["queue"]).inc();
                        self.readmit_after(id.clone(), delay);
                    } else {
                        let mut request = state.requests.remove(idx);
                        request.set_status(RequestStatus::Failed);
                        state.failed += 1;
                        state.publish_depth();
                        error!(
                            request_id = %id,
                            method = %request.method,
                            retries = request.retry_count,
                            code = %e.code,
                            "Queued request failed"
                        );
                        settled = Some((request, Err(e)));
                    }
                }
            }
        }

        if let Some((mut request, outcome)) = settled {
            request.settle(outcome);
        }
    }

    fn readmit_after(self: &Arc<Self>, id: RequestId, delay: Duration) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.state.lock();
                if let Some(idx) = state.position(&id) {
                    let request = &mut state.requests[idx];
                    if request.status == RequestStatus::Retrying {
                        request.set_status(RequestStatus::Pending);
                    }
                }
            }
            inner.schedule();
        });
    }
}
