//! WebSocket channel for web deployments.
//!
//! A background task owns the socket and reconnects with exponential backoff
//! when it drops. Connection state is published on a `watch` channel so the
//! client can fail outstanding calls the moment the link goes away.

use super::{ChannelError, ChannelReceiver, ChannelSender};
use crate::domain::config::WebSocketConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connection state of the WebSocket link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

pub struct WsSender {
    tx: mpsc::Sender<String>,
    state: watch::Receiver<ConnectionState>,
}

pub struct WsReceiver {
    rx: Mutex<mpsc::Receiver<String>>,
}

/// Control handle for the connection task. Dropping it stops the task.
pub struct WsHandle {
    state: watch::Receiver<ConnectionState>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// How a connected session ended
enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Start the connection task. Must be called from within a tokio runtime.
pub fn spawn(config: WebSocketConfig) -> (WsSender, WsReceiver, WsHandle) {
    let buffer = config.message_buffer_size.max(1);
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
    let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let task = tokio::spawn(connection_loop(
        config,
        outbound_rx,
        inbound_tx,
        state_tx,
        shutdown_rx,
    ));

    (
        WsSender {
            tx: outbound_tx,
            state: state_rx.clone(),
        },
        WsReceiver {
            rx: Mutex::new(inbound_rx),
        },
        WsHandle {
            state: state_rx,
            shutdown_tx,
            task,
        },
    )
}

/// Reconnect delay after `attempts` failed attempts, capped at the configured maximum
pub fn backoff_delay(config: &WebSocketConfig, attempts: u32) -> Duration {
    let secs = config.reconnect_delay.as_secs_f64()
        * config.backoff_multiplier.powi(attempts as i32);
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(Duration::MAX)
        .min(config.max_reconnect_delay)
}

/// Connection loop with reconnection logic.
async fn connection_loop(
    config: WebSocketConfig,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<String>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut attempts = 0u32;

    loop {
        match run_connection(
            &config,
            &mut outbound_rx,
            &inbound_tx,
            &state_tx,
            &mut shutdown_rx,
        )
        .await
        {
            Ok(SessionEnd::Shutdown) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                info!(url = %config.url, "WebSocket channel closed");
                break;
            }
            Ok(SessionEnd::Dropped) => {
                warn!(url = %config.url, "WebSocket connection lost");
                attempts = 0;
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, attempt = attempts, "WebSocket connect failed");
            }
        }

        if attempts >= config.reconnect_attempts {
            error!(
                url = %config.url,
                attempts = config.reconnect_attempts,
                "Max reconnection attempts reached"
            );
            state_tx.send_replace(ConnectionState::Failed);
            break;
        }

        state_tx.send_replace(ConnectionState::Reconnecting);
        let delay = backoff_delay(&config, attempts);
        attempts += 1;
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = attempts,
            max_attempts = config.reconnect_attempts,
            "Reconnecting"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {
                state_tx.send_replace(ConnectionState::Disconnected);
                break;
            }
        }
    }
}

/// Run a single WebSocket connection until it drops or is shut down.
async fn run_connection(
    config: &WebSocketConfig,
    outbound_rx: &mut mpsc::Receiver<String>,
    inbound_tx: &mpsc::Sender<String>,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<SessionEnd, ChannelError> {
    let (ws_stream, _) = tokio::select! {
        connected = connect_async(config.url.as_str()) => {
            connected.map_err(|e| ChannelError::Connect(e.to_string()))?
        }
        _ = shutdown_rx.recv() => return Ok(SessionEnd::Shutdown),
    };

    // Anything queued while disconnected belongs to calls already failed
    while outbound_rx.try_recv().is_ok() {}

    state_tx.send_replace(ConnectionState::Connected);
    info!(url = %config.url, "WebSocket connected");

    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!(error = %e, "WebSocket write failed");
                        return Ok(SessionEnd::Dropped);
                    }
                }
                None => {
                    let _ = write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        let _ = write.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if inbound_tx.send(text).await.is_err() {
                            let _ = write.close().await;
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    return Ok(SessionEnd::Dropped);
                }
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Ok(SessionEnd::Dropped);
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

#[async_trait]
impl ChannelSender for WsSender {
    async fn send(&self, message: String) -> Result<Option<String>, ChannelError> {
        let state = *self.state.borrow();
        if state != ConnectionState::Connected {
            return Err(ChannelError::SendFailed(format!(
                "WebSocket not connected ({:?})",
                state
            )));
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| ChannelError::ChannelClosed)?;
        Ok(None)
    }
}

#[async_trait]
impl ChannelReceiver for WsReceiver {
    async fn receive(&self) -> Result<String, ChannelError> {
        let mut guard = self.rx.lock().await;
        guard.recv().await.ok_or(ChannelError::ChannelClosed)
    }
}

impl WsHandle {
    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the link is up, the task gives up, or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ChannelError> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Failed)),
        )
        .await
        .map_err(|_| ChannelError::Connect(format!("not connected after {:?}", timeout)))?
        .map(|s| *s)
        .map_err(|_| ChannelError::ChannelClosed)?;

        match reached {
            ConnectionState::Connected => Ok(()),
            _ => Err(ChannelError::Connect("reconnection attempts exhausted".into())),
        }
    }

    /// Close the socket and wait for the connection task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}
