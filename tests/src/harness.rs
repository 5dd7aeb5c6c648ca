//! # Scripted Backend
//!
//! Plays the native backend on the far side of an in-memory channel. Each
//! request is answered according to a script, optionally after a delay or
//! behind a `pending` acknowledgement, so flows can exercise out-of-order
//! and late responses.

use std::sync::Arc;
use std::time::Duration;

use bridge_ipc::channel::memory::{self, MemoryBackend};
use bridge_ipc::{
    create_error_response, create_pending_response, create_request, create_success_response,
    decode, BridgeClient, BridgeConfig, Envelope, RequestEnvelope, ResponseEnvelope,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How the backend answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Terminal success right away
    Success(Value),
    /// Terminal error right away
    Error(&'static str, &'static str),
    /// Success after a delay
    Delayed(Duration, Value),
    /// `pending` now, success after a delay
    Acknowledged(Duration, Value),
    /// Never answer
    Silent,
}

type Script = Arc<dyn Fn(&RequestEnvelope) -> Reply + Send + Sync>;

enum Command {
    Call(RequestEnvelope, oneshot::Sender<ResponseEnvelope>),
}

/// Handle to a running scripted backend
pub struct BackendHandle {
    seen: Arc<Mutex<Vec<RequestEnvelope>>>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl BackendHandle {
    /// Requests received so far, in arrival order
    pub fn seen(&self) -> Vec<RequestEnvelope> {
        self.seen.lock().clone()
    }

    pub fn seen_methods(&self) -> Vec<String> {
        self.seen.lock().iter().map(|r| r.method.clone()).collect()
    }

    /// Send a backend-initiated request and wait for the frontend's answer.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Option<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        let request = create_request(method, params, None);
        self.commands.send(Command::Call(request, tx)).await.ok()?;
        rx.await.ok()
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a backend over `backend` that answers with `script`.
pub fn spawn_backend<F>(backend: MemoryBackend, script: F) -> BackendHandle
where
    F: Fn(&RequestEnvelope) -> Reply + Send + Sync + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (commands, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(run(backend, Arc::new(script), Arc::clone(&seen), command_rx));
    BackendHandle {
        seen,
        commands,
        task,
    }
}

/// Client attached to a fresh scripted backend
pub fn connected_client<F>(config: BridgeConfig, script: F) -> (Arc<BridgeClient>, BackendHandle)
where
    F: Fn(&RequestEnvelope) -> Reply + Send + Sync + 'static,
{
    let client = Arc::new(BridgeClient::new(config).expect("valid config"));
    let (sender, receiver, backend) = memory::pair(256);
    client
        .attach_channel(Arc::new(sender), Arc::new(receiver))
        .expect("client not disposed");
    (client, spawn_backend(backend, script))
}

async fn run(
    mut backend: MemoryBackend,
    script: Script,
    seen: Arc<Mutex<Vec<RequestEnvelope>>>,
    mut commands: mpsc::Receiver<Command>,
) {
    let (late_tx, mut late_rx) = mpsc::channel::<ResponseEnvelope>(256);
    let mut waiting: Vec<(RequestEnvelope, oneshot::Sender<ResponseEnvelope>)> = Vec::new();

    loop {
        tokio::select! {
            raw = backend.recv() => {
                let Some(raw) = raw else { break };
                match decode(&raw) {
                    Ok(Envelope::Request(request)) => {
                        seen.lock().push(request.clone());
                        let reply = script(&request);
                        answer(&backend, &late_tx, request, reply).await;
                    }
                    Ok(Envelope::Response(response)) => {
                        if let Some(idx) = waiting.iter().position(|(r, _)| r.id == response.id) {
                            let (_, tx) = waiting.swap_remove(idx);
                            let _ = tx.send(response);
                        }
                    }
                    Err(_) => {}
                }
            }
            Some(response) = late_rx.recv() => {
                if backend.respond(&response).await.is_err() {
                    break;
                }
            }
            Some(Command::Call(request, tx)) = commands.recv() => {
                if backend.request(&request).await.is_err() {
                    break;
                }
                waiting.push((request, tx));
            }
        }
    }
}

async fn answer(
    backend: &MemoryBackend,
    late: &mpsc::Sender<ResponseEnvelope>,
    request: RequestEnvelope,
    reply: Reply,
) {
    let id = request.id;
    match reply {
        Reply::Success(value) => {
            let _ = backend.respond(&create_success_response(id, value)).await;
        }
        Reply::Error(code, message) => {
            let _ = backend
                .respond(&create_error_response(id, code, message, None))
                .await;
        }
        Reply::Delayed(delay, value) => schedule(late, delay, create_success_response(id, value)),
        Reply::Acknowledged(delay, value) => {
            let _ = backend.respond(&create_pending_response(id.clone())).await;
            schedule(late, delay, create_success_response(id, value));
        }
        Reply::Silent => {}
    }
}

fn schedule(late: &mpsc::Sender<ResponseEnvelope>, delay: Duration, response: ResponseEnvelope) {
    let late = late.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = late.send(response).await;
    });
}
