//! Bidirectional message channel consumed by the transport.
//!
//! A channel moves opaque JSON strings. The sending half may return a
//! synchronous reply (the WebChannel-style `ipc_request` slot returns a value);
//! the receiving half yields backend pushes one at a time.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;

/// Sending half of a channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Write one message. `Ok(Some(reply))` carries an immediate reply.
    async fn send(&self, message: String) -> Result<Option<String>, ChannelError>;
}

/// Receiving half of a channel
#[async_trait]
pub trait ChannelReceiver: Send + Sync {
    /// Receive next message (waits until one is available)
    async fn receive(&self) -> Result<String, ChannelError>;
}

/// Channel error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("connect failed: {0}")]
    Connect(String),
}
