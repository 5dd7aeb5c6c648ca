//! In-memory channel for embedding and tests.
//!
//! `pair` returns the frontend halves plus a [`MemoryBackend`] that plays the
//! other side: it sees every message the frontend writes and can push
//! messages back. An optional responder produces synchronous replies.

use super::{ChannelError, ChannelReceiver, ChannelSender};
use crate::domain::envelope::{self, Envelope, RequestEnvelope, ResponseEnvelope};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Produces the synchronous reply for a written message, if any
pub type SyncResponder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct MemorySender {
    tx: mpsc::Sender<String>,
    responder: Option<SyncResponder>,
}

pub struct MemoryReceiver {
    rx: Mutex<mpsc::Receiver<String>>,
}

/// Backend side of an in-memory channel
pub struct MemoryBackend {
    incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<String>,
}

/// Create a channel with no synchronous replies.
pub fn pair(capacity: usize) -> (MemorySender, MemoryReceiver, MemoryBackend) {
    build(capacity, None)
}

/// Create a channel whose writes are answered synchronously by `responder`.
pub fn pair_with_responder<F>(
    capacity: usize,
    responder: F,
) -> (MemorySender, MemoryReceiver, MemoryBackend)
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    build(capacity, Some(Arc::new(responder)))
}

fn build(
    capacity: usize,
    responder: Option<SyncResponder>,
) -> (MemorySender, MemoryReceiver, MemoryBackend) {
    let (to_backend, incoming) = mpsc::channel(capacity);
    let (outgoing, from_backend) = mpsc::channel(capacity);
    (
        MemorySender {
            tx: to_backend,
            responder,
        },
        MemoryReceiver {
            rx: Mutex::new(from_backend),
        },
        MemoryBackend { incoming, outgoing },
    )
}

#[async_trait]
impl ChannelSender for MemorySender {
    async fn send(&self, message: String) -> Result<Option<String>, ChannelError> {
        let reply = self.responder.as_ref().and_then(|r| r(&message));
        self.tx
            .send(message)
            .await
            .map_err(|_| ChannelError::ChannelClosed)?;
        Ok(reply)
    }
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn receive(&self) -> Result<String, ChannelError> {
        let mut guard = self.rx.lock().await;
        guard.recv().await.ok_or(ChannelError::ChannelClosed)
    }
}

impl MemoryBackend {
    /// Next raw message written by the frontend
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next request envelope written by the frontend, skipping anything else
    pub async fn recv_request(&mut self) -> Option<RequestEnvelope> {
        while let Some(raw) = self.incoming.recv().await {
            if let Ok(Envelope::Request(req)) = envelope::decode(&raw) {
                return Some(req);
            }
        }
        None
    }

    /// Next response envelope written by the frontend, skipping anything else
    pub async fn recv_response(&mut self) -> Option<ResponseEnvelope> {
        while let Some(raw) = self.incoming.recv().await {
            if let Ok(Envelope::Response(resp)) = envelope::decode(&raw) {
                return Some(resp);
            }
        }
        None
    }

    /// Push a raw message to the frontend
    pub async fn push(&self, message: impl Into<String>) -> Result<(), ChannelError> {
        self.outgoing
            .send(message.into())
            .await
            .map_err(|_| ChannelError::ChannelClosed)
    }

    /// Push a response envelope to the frontend
    pub async fn respond(&self, response: &ResponseEnvelope) -> Result<(), ChannelError> {
        let raw = envelope::encode_response(response)
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        self.push(raw).await
    }

    /// Push a backend-initiated request to the frontend
    pub async fn request(&self, request: &RequestEnvelope) -> Result<(), ChannelError> {
        let raw = envelope::encode_request(request)
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        self.push(raw).await
    }
}
