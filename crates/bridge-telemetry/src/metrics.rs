//! Prometheus metrics for the IPC transport.
//!
//! All metrics follow the naming convention: `bridge_ipc_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., requests_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., queue_depth)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // OUTBOUND CALLS
    // =========================================================================

    /// Request envelopes written to the channel
    pub static ref IPC_REQUESTS_SENT: Counter = Counter::new(
        "bridge_ipc_requests_sent_total",
        "Total number of request envelopes written to the channel"
    ).expect("metric creation failed");

    /// Terminal responses delivered to callers
    pub static ref IPC_RESPONSES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("bridge_ipc_responses_received_total", "Terminal responses delivered to callers"),
        &["status"]  // status: success/error
    ).expect("metric creation failed");

    /// Calls that hit their wall-clock bound
    pub static ref IPC_TIMEOUTS: Counter = Counter::new(
        "bridge_ipc_timeouts_total",
        "Total number of calls that timed out"
    ).expect("metric creation failed");

    /// Synchronous channel write failures
    pub static ref IPC_SEND_ERRORS: Counter = Counter::new(
        "bridge_ipc_send_errors_total",
        "Total number of channel write failures"
    ).expect("metric creation failed");

    /// Retries scheduled
    pub static ref IPC_RETRIES: CounterVec = CounterVec::new(
        Opts::new("bridge_ipc_retries_total", "Retries scheduled by the transport"),
        &["path"]  // path: direct/queue
    ).expect("metric creation failed");

    // =========================================================================
    // INBOUND CALLS
    // =========================================================================

    /// Backend-initiated requests dispatched to handlers
    pub static ref IPC_INBOUND_REQUESTS: Counter = Counter::new(
        "bridge_ipc_inbound_requests_total",
        "Total number of backend-initiated requests dispatched"
    ).expect("metric creation failed");

    /// Inbound requests answered with an error
    pub static ref IPC_HANDLER_ERRORS: CounterVec = CounterVec::new(
        Opts::new("bridge_ipc_handler_errors_total", "Inbound requests answered with an error"),
        &["code"]
    ).expect("metric creation failed");

    // =========================================================================
    // OCCUPANCY
    // =========================================================================

    /// Requests currently held by the priority queue
    pub static ref IPC_QUEUE_DEPTH: Gauge = Gauge::new(
        "bridge_ipc_queue_depth",
        "Number of requests currently held by the priority queue"
    ).expect("metric creation failed");

    /// Entries currently in the correlation table
    pub static ref IPC_PENDING_ENTRIES: Gauge = Gauge::new(
        "bridge_ipc_pending_entries",
        "Number of requests awaiting a terminal response"
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Outbound
        Box::new(IPC_REQUESTS_SENT.clone()),
        Box::new(IPC_RESPONSES_RECEIVED.clone()),
        Box::new(IPC_TIMEOUTS.clone()),
        Box::new(IPC_SEND_ERRORS.clone()),
        Box::new(IPC_RETRIES.clone()),
        // Inbound
        Box::new(IPC_INBOUND_REQUESTS.clone()),
        Box::new(IPC_HANDLER_ERRORS.clone()),
        // Occupancy
        Box::new(IPC_QUEUE_DEPTH.clone()),
        Box::new(IPC_PENDING_ENTRIES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
