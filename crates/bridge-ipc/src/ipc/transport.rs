//! Transport binding over a bidirectional channel.
//!
//! Outbound: stamp credentials, register in the correlation table, write the
//! envelope, race the terminal response against the timer.
//!
//! Inbound: decode each message and route it by shape. A terminal response
//! settles its pending entry, a `pending` response only marks it, and a
//! backend request is dispatched to the handler registry with the answer
//! written back on the same id.

use crate::channel::{ChannelError, ChannelReceiver, ChannelSender};
use crate::domain::envelope::{self, Envelope, ResponseEnvelope};
use crate::domain::error::{IpcError, IpcResult};
use crate::domain::request_id::RequestId;
use crate::ipc::credentials::{self, CredentialProvider};
use crate::ipc::handlers::HandlerRegistry;
use crate::ipc::pending::CorrelationTable;
use crate::ipc::timeout::TimedCall;
use bridge_telemetry::{log_ipc_event, IPC_REQUESTS_SENT, IPC_SEND_ERRORS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type ChannelSlot = Option<Arc<dyn ChannelSender>>;

pub struct Transport {
    channel: watch::Sender<ChannelSlot>,
    table: Arc<CorrelationTable>,
    handlers: Arc<HandlerRegistry>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    init_timeout: Duration,
}

impl Transport {
    pub fn new(
        table: Arc<CorrelationTable>,
        handlers: Arc<HandlerRegistry>,
        init_timeout: Duration,
    ) -> Self {
        let (channel, _) = watch::channel(None);
        Self {
            channel,
            table,
            handlers,
            credentials: None,
            init_timeout,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Bind the channel and wake callers waiting for readiness.
    ///
    /// Only the first attach takes effect; later ones are logged and ignored.
    pub fn attach(&self, sender: Arc<dyn ChannelSender>) -> bool {
        let attached = self.channel.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(sender);
                true
            }
        });
        if attached {
            info!("IPC channel attached");
        } else {
            warn!("IPC channel already attached, ignoring");
        }
        attached
    }

    /// Unbind the channel. Later calls wait for a new attach.
    pub fn detach(&self) {
        self.channel.send_replace(None);
    }

    pub fn is_ready(&self) -> bool {
        self.channel.borrow().is_some()
    }

    /// Wait for a channel to be attached, bounded by the init timeout.
    pub async fn wait_ready(&self) -> IpcResult<Arc<dyn ChannelSender>> {
        let mut rx = self.channel.subscribe();
        let ready = tokio::time::timeout(self.init_timeout, rx.wait_for(Option::is_some)).await;
        match ready {
            Ok(Ok(slot)) => {
                let sender: ChannelSlot = (*slot).clone();
                sender.ok_or_else(|| IpcError::init_error("channel detached"))
            }
            Ok(Err(_)) => Err(IpcError::init_error("channel closed")),
            Err(_) => Err(IpcError::init_error(format!(
                "no channel attached within {}ms",
                self.init_timeout.as_millis()
            ))),
        }
    }

    /// Send one request and wait for its terminal response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> IpcResult<Value> {
        let sender = self.wait_ready().await?;

        let (token, session_id) = match &self.credentials {
            Some(creds) => (creds.token(), creds.session_id()),
            None => (None, None),
        };
        if token.is_none() {
            debug!(method = method, "No auth token available");
        }
        let request = envelope::create_request(
            method,
            credentials::stamp_token(params, token),
            credentials::session_meta(session_id),
        );
        let id = request.id.clone();
        let raw = envelope::encode_request(&request)?;

        let rx = self.table.register(id.clone(), method)?;
        let call = TimedCall::new(&self.table, id.clone(), method, timeout);
        IPC_REQUESTS_SENT.inc();
        log_ipc_event!(debug, "Sending request", id, method, timeout_ms = timeout.as_millis() as u64);

        match call.within(sender.send(raw)).await {
            Some(Ok(Some(reply))) => self.on_immediate_reply(&id, &reply),
            Some(Ok(None)) => {}
            Some(Err(e)) => {
                call.abandon();
                IPC_SEND_ERRORS.inc();
                error!(request_id = %id, method = method, error = %e, "Send failed");
                return Err(IpcError::send_error(e.to_string()));
            }
            None => warn!(request_id = %id, method = method, "Write still blocked at deadline"),
        }

        let settled = call.wait(rx).await;
        log_ipc_event!(
            debug,
            "Request settled",
            id,
            method,
            state = ?settled.state,
            elapsed_ms = settled.elapsed.as_millis() as u64
        );
        settled.outcome
    }

    /// Route one inbound message. Errors are logged, never propagated.
    pub async fn on_message(&self, raw: &str) {
        match envelope::decode(raw) {
            Ok(Envelope::Response(response)) => self.on_response(response),
            Ok(Envelope::Request(request)) => {
                let response = self.handlers.dispatch(request).await;
                self.send_response(&response).await;
            }
            Err(e) => match request_id_of(raw) {
                Some(id) => {
                    warn!(request_id = %id, error = %e, "Malformed backend request");
                    self.send_response(&envelope::error_response(id, e)).await;
                }
                None => warn!(error = %e, "Dropping undecodable message"),
            },
        }
    }

    /// Feed inbound messages to `on_message` until the channel closes.
    ///
    /// Each message is handled on its own task in a set owned by this loop.
    /// Aborting the loop aborts handlers still in flight.
    pub async fn run_inbound(self: Arc<Self>, receiver: Arc<dyn ChannelReceiver>) {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                received = receiver.receive() => match received {
                    Ok(raw) => {
                        let transport = Arc::clone(&self);
                        in_flight.spawn(async move { transport.on_message(&raw).await });
                    }
                    Err(ChannelError::ChannelClosed) => {
                        warn!("IPC receiver channel closed, stopping listener");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Error receiving IPC message");
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Inbound message task failed");
                    }
                }
            }
        }
        while in_flight.join_next().await.is_some() {}
    }

    /// Fail every outstanding call
    pub fn reject_all(&self, error: IpcError) -> usize {
        self.table.reject_all(error)
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    fn on_response(&self, response: ResponseEnvelope) {
        if !response.is_terminal() {
            if self.table.acknowledge(&response.id) {
                debug!(request_id = %response.id, "Request acknowledged, awaiting push");
            } else {
                debug!(request_id = %response.id, "Pending response for unknown request id");
            }
            return;
        }
        let id = response.id.clone();
        if !self.table.resolve(response) {
            warn!(request_id = %id, "Response for unknown or expired request id");
        }
    }

    fn on_immediate_reply(&self, id: &RequestId, reply: &str) {
        match envelope::decode(reply) {
            Ok(Envelope::Response(response)) => self.on_response(response),
            Ok(Envelope::Request(_)) => {
                warn!(request_id = %id, "Immediate reply is a request, ignoring");
            }
            Err(e) => {
                warn!(request_id = %id, error = %e, "Undecodable immediate reply");
                self.table.reject(id, e);
            }
        }
    }

    async fn send_response(&self, response: &ResponseEnvelope) {
        let raw = match envelope::encode_response(response) {
            Ok(raw) => raw,
            Err(e) => {
                error!(request_id = %response.id, error = %e, "Failed to encode response");
                return;
            }
        };
        let sender: ChannelSlot = self.channel.borrow().clone();
        match sender {
            Some(sender) => {
                if let Err(e) = sender.send(raw).await {
                    IPC_SEND_ERRORS.inc();
                    error!(request_id = %response.id, error = %e, "Failed to send response");
                }
            }
            None => warn!(request_id = %response.id, "No channel attached, dropping response"),
        }
    }
}

/// Id of a message that claims to be a request but failed to decode.
fn request_id_of(raw: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(raw).ok()?;
    if !envelope::is_request(&value) {
        return None;
    }
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(RequestId::new(id.as_str())),
        Value::Number(n) => Some(RequestId::new(n.to_string())),
        _ => None,
    }
}
