//! Client facade over the transport, the direct retry path and the queue.
//!
//! A `BridgeClient` is built explicitly from a validated `BridgeConfig`, bound
//! to a channel, and disposed explicitly. Instances are independent; nothing
//! is shared through globals except the metrics registry.

use crate::channel::websocket::{self, ConnectionState, WsHandle};
use crate::channel::{ChannelReceiver, ChannelSender};
use crate::domain::config::{BridgeConfig, TimeoutConfig};
use crate::domain::error::{BridgeError, IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use crate::domain::types::{InvokeOptions, QueueStats, QueuedRequestInfo, RequestStatus};
use crate::ipc::credentials::CredentialProvider;
use crate::ipc::handlers::{HandlerRegistry, RequestHandler};
use crate::ipc::pending::CorrelationTable;
use crate::ipc::retry::RetryController;
use crate::ipc::transport::Transport;
use crate::queue::{RequestExecutor, RequestQueue};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Direct path: timeout selection plus the system-not-ready retry loop.
///
/// Also executes each attempt of a queued request, so both paths share one
/// correlation table.
pub struct DirectInvoker {
    transport: Arc<Transport>,
    retry: RetryController,
    timeouts: TimeoutConfig,
}

impl DirectInvoker {
    pub fn new(transport: Arc<Transport>, retry: RetryController, timeouts: TimeoutConfig) -> Self {
        Self {
            transport,
            retry,
            timeouts,
        }
    }

    pub async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> IpcResult<Value> {
        let timeout = self.timeouts.timeout_for(method, timeout);
        let transport = &self.transport;
        self.retry
            .run(method, || transport.call(method, params.clone(), timeout))
            .await
    }
}

#[async_trait]
impl RequestExecutor for DirectInvoker {
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> IpcResult<Value> {
        self.invoke(method, params, timeout).await
    }
}

pub struct BridgeClient {
    config: BridgeConfig,
    transport: Arc<Transport>,
    direct: Arc<DirectInvoker>,
    queue: RequestQueue,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl BridgeClient {
    /// Build a client from `config`. Fails if the config does not validate.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        Self::build(config, None)
    }

    /// Build a client that stamps every outbound call with `credentials`.
    pub fn with_credentials(
        config: BridgeConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, BridgeError> {
        Self::build(config, Some(credentials))
    }

    fn build(
        config: BridgeConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let table = Arc::new(CorrelationTable::new(config.limits.max_pending));
        let handlers = Arc::new(match &config.methods.inbound {
            Some(methods) => HandlerRegistry::closed(methods.iter().cloned()),
            None => HandlerRegistry::new(),
        });

        let mut transport = Transport::new(table, handlers, config.timeouts.init);
        if let Some(credentials) = credentials {
            transport = transport.with_credentials(credentials);
        }
        let transport = Arc::new(transport);

        let direct = Arc::new(DirectInvoker::new(
            Arc::clone(&transport),
            RetryController::new(config.retry.system_not_ready.clone()),
            config.timeouts.clone(),
        ));
        let queue = RequestQueue::new(
            Arc::clone(&direct) as Arc<dyn RequestExecutor>,
            config.limits.max_queue,
            config.limits.max_concurrency,
            config.retry.queue.clone(),
        );

        info!(
            max_pending = config.limits.max_pending,
            max_queue = config.limits.max_queue,
            max_concurrency = config.limits.max_concurrency,
            "Bridge client created"
        );

        Ok(Self {
            config,
            transport,
            direct,
            queue,
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bind a channel and start the inbound loop.
    ///
    /// A second attach is ignored, matching the transport.
    pub fn attach_channel(
        &self,
        sender: Arc<dyn ChannelSender>,
        receiver: Arc<dyn ChannelReceiver>,
    ) -> Result<(), BridgeError> {
        self.ensure_live()?;
        if !self.transport.attach(sender) {
            return Ok(());
        }
        let inbound = tokio::spawn(Arc::clone(&self.transport).run_inbound(receiver));
        self.tasks.lock().push(inbound);
        Ok(())
    }

    /// Open the configured WebSocket and attach it.
    ///
    /// Outstanding calls are rejected with `DISCONNECTED` whenever the link
    /// leaves the connected state.
    pub fn connect_websocket(&self) -> Result<WsHandle, BridgeError> {
        self.ensure_live()?;
        let (sender, receiver, handle) = websocket::spawn(self.config.websocket.clone());
        self.attach_channel(Arc::new(sender), Arc::new(receiver))?;

        let mut state = handle.subscribe();
        let transport = Arc::clone(&self.transport);
        let watcher = tokio::spawn(async move {
            let mut was_connected = *state.borrow_and_update() == ConnectionState::Connected;
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                let connected = current == ConnectionState::Connected;
                if was_connected && !connected {
                    let rejected =
                        transport.reject_all(IpcError::disconnected("WebSocket connection lost"));
                    warn!(state = ?current, rejected = rejected, "Connection lost, pending calls rejected");
                }
                was_connected = connected;
            }
        });
        self.tasks.lock().push(watcher);
        Ok(handle)
    }

    /// Call `method` on the backend.
    ///
    /// With a priority or retry options set the call goes through the queue;
    /// otherwise it is sent directly with the system-not-ready retry loop.
    pub async fn invoke(
        &self,
        method: &str,
        params: Option<Value>,
        options: InvokeOptions,
    ) -> IpcResult<Value> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(IpcError::disconnected("client disposed"));
        }
        if !self.config.methods.outbound_allowed(method) {
            warn!(method = method, "Rejected call to method outside the outbound registry");
            return Err(IpcError::unknown_method(method));
        }

        if options.is_queued() {
            self.queue.enqueue(method, params, options).await
        } else {
            self.direct.invoke(method, params, options.timeout).await
        }
    }

    /// Typed `invoke`: params are serialized and the result is checked
    /// against `R`. Shape mismatches fail with `INVALID_PAYLOAD`.
    pub async fn invoke_typed<P, R>(
        &self,
        method: &str,
        params: &P,
        options: InvokeOptions,
    ) -> IpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| {
            IpcError::invalid_payload(format!("params for '{}' do not serialize: {}", method, e))
        })?;
        let params = (!params.is_null()).then_some(params);

        let result = self.invoke(method, params, options).await?;
        serde_json::from_value(result).map_err(|e| {
            IpcError::invalid_payload(format!("result of '{}' has unexpected shape: {}", method, e))
        })
    }

    /// Register a handler for a backend-initiated method.
    pub fn register_handler<H>(&self, method: impl Into<String>, handler: H) -> Result<(), BridgeError>
    where
        H: RequestHandler + 'static,
    {
        self.transport.handlers().register(method, Arc::new(handler))
    }

    pub fn unregister_handler(&self, method: &str) -> bool {
        self.transport.handlers().unregister(method)
    }

    pub fn handler_methods(&self) -> Vec<String> {
        self.transport.handlers().methods()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn all_requests(&self) -> Vec<QueuedRequestInfo> {
        self.queue.all_requests()
    }

    pub fn requests_by_status(&self, status: RequestStatus) -> Vec<QueuedRequestInfo> {
        self.queue.requests_by_status(status)
    }

    pub fn cancel_request(&self, id: &RequestId) -> bool {
        self.queue.cancel(id)
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    /// Calls waiting on a backend response
    pub fn pending_count(&self) -> usize {
        self.transport.table().pending_count()
    }

    pub fn is_ready(&self) -> bool {
        self.transport.is_ready()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop background tasks, fail every outstanding call with
    /// `DISCONNECTED` and cancel the queue. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.transport.detach();
        let rejected = self
            .transport
            .reject_all(IpcError::disconnected("client disposed"));
        let cancelled = self.queue.clear();
        info!(rejected = rejected, cancelled = cancelled, "Bridge client disposed");
    }

    fn ensure_live(&self) -> Result<(), BridgeError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(BridgeError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        debug!("Bridge client dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory;
    use crate::domain::envelope::{self, create_error_response, create_success_response, Envelope, RequestEnvelope};
    use crate::domain::error::codes;
    use crate::domain::types::Priority;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn echo_responder(raw: &str) -> Option<String> {
        let Ok(Envelope::Request(req)) = envelope::decode(raw) else {
            return None;
        };
        let result = json!({ "method": req.method, "params": req.params });
        envelope::encode_response(&create_success_response(req.id, result)).ok()
    }

    /// Client on an echoing in-memory channel. Keep the backend alive.
    fn attached(config: BridgeConfig) -> (BridgeClient, memory::MemoryBackend) {
        let client = BridgeClient::new(config).unwrap();
        let (sender, receiver, backend) = memory::pair_with_responder(16, echo_responder);
        client
            .attach_channel(Arc::new(sender), Arc::new(receiver))
            .unwrap();
        (client, backend)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.limits.max_concurrency = 0;
        assert!(matches!(BridgeClient::new(config), Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_direct_invoke() {
        let (client, _backend) = attached(BridgeConfig::default());
        let result = client
            .invoke("get_all", Some(json!({"page": 2})), InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(result["method"], "get_all");
        assert_eq!(result["params"]["page"], 2);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_invoke() {
        let (client, _backend) = attached(BridgeConfig::default());
        let options = InvokeOptions::new().with_priority(Priority::High);
        let result = client.invoke("sync_data", None, options).await.unwrap();
        assert_eq!(result["method"], "sync_data");
        assert_eq!(client.queue_stats().completed, 1);
    }

    #[tokio::test]
    async fn test_outbound_allow_list() {
        let mut config = BridgeConfig::default();
        config.methods.outbound = Some(vec!["get_all".to_string()]);
        let (client, _backend) = attached(config);

        assert!(client.invoke("get_all", None, InvokeOptions::default()).await.is_ok());
        let err = client
            .invoke("drop_tables", None, InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNKNOWN_METHOD);
    }

    #[tokio::test]
    async fn test_closed_inbound_registry() {
        let mut config = BridgeConfig::default();
        config.methods.inbound = Some(vec!["notify".to_string()]);
        let client = BridgeClient::new(config).unwrap();

        let ok = client.register_handler("notify", |_req: RequestEnvelope| async {
            Ok::<Value, IpcError>(Value::Null)
        });
        assert!(ok.is_ok());
        let err = client.register_handler("other", |_req: RequestEnvelope| async {
            Ok::<Value, IpcError>(Value::Null)
        });
        assert!(matches!(err, Err(BridgeError::UnregisteredMethod(m)) if m == "other"));
        assert_eq!(client.handler_methods(), vec!["notify".to_string()]);
        assert!(client.unregister_handler("notify"));
    }

    #[tokio::test]
    async fn test_invoke_typed() {
        #[derive(Serialize)]
        struct Query {
            page: u32,
        }

        #[derive(Deserialize, Debug, PartialEq)]
        struct Echo {
            method: String,
        }

        let (client, _backend) = attached(BridgeConfig::default());
        let echo: Echo = client
            .invoke_typed("get_all", &Query { page: 1 }, InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(echo.method, "get_all");

        let err = client
            .invoke_typed::<_, Vec<u32>>("get_all", &Query { page: 1 }, InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PAYLOAD);
    }

    #[tokio::test]
    async fn test_backend_error_passes_through() {
        let client = BridgeClient::new(BridgeConfig::default()).unwrap();
        let (sender, receiver, _backend) = memory::pair_with_responder(4, |raw| {
            let Ok(Envelope::Request(req)) = envelope::decode(raw) else {
                return None;
            };
            let response = create_error_response(req.id, "PERMISSION_DENIED", "not allowed", None);
            envelope::encode_response(&response).ok()
        });
        client
            .attach_channel(Arc::new(sender), Arc::new(receiver))
            .unwrap();

        let err = client
            .invoke("delete_all", None, InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "PERMISSION_DENIED");
        assert_eq!(err.message, "not allowed");
    }

    #[tokio::test]
    async fn test_dispose_rejects_pending() {
        let client = Arc::new(BridgeClient::new(BridgeConfig::default()).unwrap());
        let (sender, receiver, mut backend) = memory::pair(4);
        client
            .attach_channel(Arc::new(sender), Arc::new(receiver))
            .unwrap();

        let caller = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("long_task", None, InvokeOptions::default()).await })
        };
        backend.recv_request().await.unwrap();
        assert_eq!(client.pending_count(), 1);

        client.dispose();
        client.dispose();
        assert_eq!(caller.await.unwrap().unwrap_err().code, codes::DISCONNECTED);
        assert!(client.is_disposed());

        let err = client.invoke("get_all", None, InvokeOptions::default()).await.unwrap_err();
        assert_eq!(err.code, codes::DISCONNECTED);
        let (s, r, _b) = memory::pair(1);
        assert!(matches!(
            client.attach_channel(Arc::new(s), Arc::new(r)),
            Err(BridgeError::Disposed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_options_without_priority_are_honoured() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let client = BridgeClient::new(BridgeConfig::default()).unwrap();
        let (sender, receiver, _backend) = memory::pair_with_responder(16, move |raw| {
            let Ok(Envelope::Request(req)) = envelope::decode(raw) else {
                return None;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let response =
                create_error_response(req.id, codes::NETWORK_ERROR, "connection reset", None);
            envelope::encode_response(&response).ok()
        });
        client
            .attach_channel(Arc::new(sender), Arc::new(receiver))
            .unwrap();

        let options = InvokeOptions::new()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(10));
        let err = client.invoke("sync_data", None, options).await.unwrap_err();

        assert_eq!(err.code, codes::NETWORK_ERROR);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(client.queue_stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_aborts_running_handlers() {
        let (client, backend) = attached(BridgeConfig::default());
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            client
                .register_handler("slow_job", move |_req: RequestEnvelope| {
                    let started = Arc::clone(&started);
                    let finished = Arc::clone(&finished);
                    async move {
                        started.notify_one();
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        finished.store(true, Ordering::SeqCst);
                        Ok::<Value, IpcError>(Value::Null)
                    }
                })
                .unwrap();
        }

        backend
            .request(&envelope::create_request("slow_job", None, None))
            .await
            .unwrap();
        started.notified().await;

        client.dispose();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
