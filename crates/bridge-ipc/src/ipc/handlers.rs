//! Registry of handlers for backend-initiated requests.

use crate::domain::envelope::{create_success_response, error_response, RequestEnvelope, ResponseEnvelope};
use crate::domain::error::{BridgeError, IpcError};
use async_trait::async_trait;
use bridge_telemetry::{IPC_HANDLER_ERRORS, IPC_INBOUND_REQUESTS};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Handler for one inbound method
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RequestEnvelope) -> Result<Value, IpcError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, IpcError>> + Send + 'static,
{
    async fn handle(&self, request: RequestEnvelope) -> Result<Value, IpcError> {
        (self)(request).await
    }
}

/// Method name → handler. With an allow-list configured, registration is
/// limited to the listed methods.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn RequestHandler>>,
    allowed: Option<HashSet<String>>,
}

impl HandlerRegistry {
    /// Open registry: any method may be registered
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            allowed: None,
        }
    }

    /// Closed registry over `methods`
    pub fn closed<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            handlers: DashMap::new(),
            allowed: Some(methods.into_iter().map(Into::into).collect()),
        }
    }

    /// Register (or replace) the handler for `method`.
    pub fn register(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), BridgeError> {
        let method = method.into();
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(&method) {
                return Err(BridgeError::UnregisteredMethod(method));
            }
        }
        if self.handlers.insert(method.clone(), handler).is_some() {
            warn!(method = %method, "Replaced existing handler");
        } else {
            debug!(method = %method, "Registered handler");
        }
        Ok(())
    }

    /// Remove the handler for `method`. Returns true if one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.remove(method).is_some()
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        methods.sort();
        methods
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Run the handler for `request` and build its terminal response.
    ///
    /// Never fails: a missing handler, a handler error and a handler panic all
    /// become error responses carrying the request id.
    pub async fn dispatch(&self, request: RequestEnvelope) -> ResponseEnvelope {
        IPC_INBOUND_REQUESTS.inc();
        let id = request.id.clone();
        let method = request.method.clone();

        // Clone out of the map so no shard lock is held across the await
        let handler = self.handlers.get(&method).map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            warn!(request_id = %id, method = %method, "No handler registered for method");
            IPC_HANDLER_ERRORS
                .with_label_values(&[crate::domain::error::codes::HANDLER_NOT_FOUND])
                .inc();
            return error_response(id, IpcError::handler_not_found(&method));
        };

        // Held in a set so cancelling this dispatch also aborts the handler
        let mut task = JoinSet::new();
        task.spawn(async move { handler.handle(request).await });
        let joined = match task.join_next().await {
            Some(joined) => joined,
            None => return error_response(id, IpcError::handler_error("Handler task vanished")),
        };
        let error = match joined {
            Ok(Ok(result)) => {
                debug!(request_id = %id, method = %method, "Request handled");
                return create_success_response(id, result);
            }
            Ok(Err(e)) => {
                error!(request_id = %id, method = %method, error = %e, "Handler failed");
                let details = serde_json::to_value(&e).ok();
                let mut wrapped = IpcError::handler_error(e.message);
                wrapped.details = details;
                wrapped
            }
            Err(join_error) => {
                error!(request_id = %id, method = %method, error = %join_error, "Handler panicked");
                IpcError::handler_error(format!("Handler for '{}' panicked", method))
            }
        };

        IPC_HANDLER_ERRORS
            .with_label_values(&[error.code.as_str()])
            .inc();
        error_response(id, error)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
