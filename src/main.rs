//! ==============================================================================
//! main.rs - device telemetry server entry point
//! ==============================================================================
//!
//! purpose:
//!     accepts batches of timestamped counter readings from devices and
//!     answers "latest reading timestamp" and "cumulative count" per device.
//!
//! responsibilities:
//!     - parse flags and load telemetry.toml
//!     - initialize tracing (RUST_LOG, else logging.level)
//!     - own the DeviceStore and hand it to the web server
//!     - shut down cleanly on SIGINT / SIGTERM
//!
//! relationships:
//!     - uses: config.rs (TelemetryConfig, CliArgs)
//!     - uses: server.rs (router, graceful shutdown)
//!     - uses: store.rs (DeviceStore, shared by ingest and queries)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                  axum server (server.rs)                 │
//!     │   POST /device         GET /latest_timestamp, /cumulative │
//!     └────────┬───────────────────────────┬─────────────────────┘
//!              │                           │
//!     ┌────────┴──────────┐       ┌────────┴────────┐
//!     │ batch processor   │       │ query service   │
//!     │ (ingest.rs)       │       │ (query.rs)      │
//!     └────────┬──────────┘       └────────┬────────┘
//!              └─────────────┬─────────────┘
//!                    ┌───────┴───────┐
//!                    │  DeviceStore  │ <- per-device locks
//!                    └───────────────┘
//!
//!     all state is in memory and is gone when the process exits.
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use device_telemetry::config::{CliArgs, TelemetryConfig};
use device_telemetry::server;
use device_telemetry::store::DeviceStore;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: flags and configuration
    let args = CliArgs::parse();
    let (config, source) = TelemetryConfig::from_args(&args)?;

    // step 2: logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    println!("===========================================================");
    println!("  Device Telemetry Aggregator");
    println!("===========================================================");
    match &source {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::warn!("No config file found - using defaults"),
    }
    config.print_summary();

    // step 3: device state lives for the life of the process
    let store = Arc::new(DeviceStore::new());

    // step 4: serve until signalled
    if let Err(e) = server::run(&config, store.clone()).await {
        tracing::error!("Fatal: web server error: {:#}", e);
        return Err(e);
    }

    tracing::info!(devices = store.len().await, "stopped");
    Ok(())
}
