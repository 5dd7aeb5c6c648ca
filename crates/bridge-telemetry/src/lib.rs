//! # Bridge Telemetry
//!
//! Structured logging and Prometheus metrics for the Webbridge IPC transport.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with an `EnvFilter` and either a
//!   pretty or a JSON formatting layer
//! - **Metrics**: Prometheus counters and gauges covering requests, responses,
//!   timeouts, retries, inbound handler calls and queue depth
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//!
//!     // Logs and metrics are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BRIDGE_SERVICE_NAME` | `webbridge` | Service name attached to logs |
//! | `BRIDGE_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `BRIDGE_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `BRIDGE_JSON_LOGS` | `false` | Emit JSON formatted logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::LoggingGuard;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, IPC_HANDLER_ERRORS, IPC_INBOUND_REQUESTS,
    IPC_PENDING_ENTRIES, IPC_QUEUE_DEPTH, IPC_REQUESTS_SENT, IPC_RESPONSES_RECEIVED, IPC_RETRIES,
    IPC_SEND_ERRORS, IPC_TIMEOUTS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize log subscriber: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
///
/// # Example
///
/// ```rust,ignore
/// let config = TelemetryConfig::from_env();
/// let _guard = init_telemetry(config)?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first; the logging layer reports what it registered
    let metrics_handle = register_metrics()?;
    let logging_guard = logging::init_logging(&config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        _logging: logging_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Log an IPC event with the standard request fields.
///
/// # Example
///
/// ```rust,ignore
/// use bridge_telemetry::log_ipc_event;
///
/// log_ipc_event!(debug, "Sent request", request_id, "get_all");
/// ```
#[macro_export]
macro_rules! log_ipc_event {
    ($level:ident, $msg:expr, $request_id:expr, $method:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            request_id = %$request_id,
            method = $method,
            $($($field)*,)?
            $msg
        )
    };
}
