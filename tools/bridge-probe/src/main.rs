//! # bridge-probe
//!
//! Connects to a Webbridge backend over WebSocket, invokes one method and
//! prints the JSON result.
//!
//! ```text
//! bridge-probe get_all
//! bridge-probe --url ws://127.0.0.1:9000 save_task '{"title":"x"}' --priority high
//! bridge-probe --config bridge.json login '{"user":"a"}' --token abc
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_ipc::{BridgeClient, BridgeConfig, InvokeOptions, Priority, StaticCredentials};
use bridge_telemetry::{init_telemetry, TelemetryConfig};
use clap::Parser;
use serde_json::Value;
use tracing::info;

/// Invoke one backend method and print the result
#[derive(Parser, Debug)]
#[command(name = "bridge-probe")]
#[command(about = "Invoke one method on a Webbridge backend over WebSocket")]
struct Args {
    /// Method to invoke
    method: String,

    /// Call parameters as JSON
    params: Option<String>,

    /// Backend WebSocket URL (overrides the config file)
    #[arg(short, long)]
    url: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Route the call through the priority queue (low, normal, high, urgent)
    #[arg(short, long)]
    priority: Option<Priority>,

    /// Per-call timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// How long to wait for the connection, in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Auth token stamped into the params
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print compact instead of pretty JSON
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::for_component("probe");
    if let Some(level) = &args.log_level {
        telemetry = telemetry.with_log_level(level.clone());
    }
    let _telemetry = init_telemetry(telemetry)?;

    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(url) = &args.url {
        config.websocket.url = url.clone();
    }

    let params: Option<Value> = args
        .params
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("params must be valid JSON")?;

    let client = match &args.token {
        Some(token) => {
            BridgeClient::with_credentials(config, Arc::new(StaticCredentials::with_token(token)))?
        }
        None => BridgeClient::new(config)?,
    };

    let url = client.config().websocket.url.clone();
    let handle = client.connect_websocket()?;
    handle
        .wait_connected(Duration::from_millis(args.connect_timeout_ms))
        .await
        .with_context(|| format!("connecting to {}", url))?;
    info!(url = %url, method = %args.method, "Connected, invoking");

    let mut options = InvokeOptions::new();
    if let Some(priority) = args.priority {
        options = options.with_priority(priority);
    }
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let outcome = client.invoke(&args.method, params, options).await;
    client.dispose();
    handle.stop().await;

    let result = outcome.with_context(|| format!("invoking '{}'", args.method))?;
    let rendered = if args.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", rendered);
    Ok(())
}
