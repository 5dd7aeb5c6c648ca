//! # Bridge IPC
//!
//! Request/response transport between a desktop frontend and its native
//! backend process, multiplexed over one bidirectional message channel.
//!
//! ## Architecture
//!
//! ```text
//!   invoke(method, params, options)
//!          │
//!          ├── priority set ──▶ RequestQueue ──┐   (admission, priority, retry)
//!          │                                   ▼
//!          └──────────────────────────▶ DirectInvoker  (system-not-ready retry)
//!                                              │
//!                                              ▼
//!                                          Transport ──▶ ChannelSender
//!                                          │   ▲
//!                            CorrelationTable  │
//!                                  ▲           │
//!                                  │     ChannelReceiver
//!                 terminal response┘           │
//!                                              └──▶ HandlerRegistry (backend requests)
//! ```
//!
//! ## Guarantees
//!
//! | Guarantee | Where |
//! |-----------|-------|
//! | At most one terminal response per request id | `ipc/pending.rs` remove-then-deliver |
//! | Responses routed by id in any order | `ipc/transport.rs` `on_message` |
//! | Queue rejects at capacity without mutating | `queue/scheduler.rs` `submit` |
//! | Higher priority first, arrival order within a priority | stable sort in `submit` |
//! | Every call has a bounded wait | `ipc/timeout.rs`, init wait in `Transport::wait_ready` |
//! | Every backend request gets a terminal response | `ipc/handlers.rs` `dispatch` |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_ipc::{BridgeClient, BridgeConfig, InvokeOptions, Priority};
//!
//! let client = BridgeClient::new(BridgeConfig::default())?;
//! let _ws = client.connect_websocket()?;
//!
//! let tasks = client.invoke("get_all", None, InvokeOptions::default()).await?;
//! let synced = client
//!     .invoke("sync_data", None, InvokeOptions::new().with_priority(Priority::High))
//!     .await?;
//! client.dispose();
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod domain;
pub mod ipc;
pub mod queue;

pub use channel::memory::{MemoryBackend, MemoryReceiver, MemorySender};
pub use channel::websocket::{ConnectionState, WsHandle, WsReceiver, WsSender};
pub use channel::{ChannelError, ChannelReceiver, ChannelSender};
pub use client::{BridgeClient, DirectInvoker};
pub use domain::*;
pub use ipc::{
    CallOutcome, CallState, CorrelationTable, CredentialProvider, HandlerRegistry,
    PendingSnapshot, RequestHandler, RetryController, Settled, StaticCredentials, TimedCall,
    Transport,
};
pub use queue::{QueueTicket, RequestExecutor, RequestQueue};
