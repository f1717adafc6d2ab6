//! # PinHub Gateway
//!
//! Device and realtime server for virtual pin synchronization.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Gateway Process                                │
//! │                                                                         │
//! │  Device ───► TCP (8442) ───► PinSync ───► SQLite (history)            │
//! │                                 │   └───► Redis (latest values)        │
//! │                                 ▼                                       │
//! │  Dashboard ◄── WS (8080) ◄── FanOut                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! gateway [--config <path>]
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=pinhub_sync=trace` - Trace the engine only
//! - Default: INFO level

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pinhub_db::Database;
use pinhub_sync::{gateway, Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = parse_args()?;
    let config = GatewayConfig::load(config_path).context("Failed to load configuration")?;
    info!(
        device_addr = %config.server.device_address(),
        realtime_addr = %config.server.realtime_address(),
        redis = config.cache.redis_url.is_some(),
        history = config.history.enabled,
        "Configuration loaded"
    );

    let db = Database::new(config.database())
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    info!(path = %config.database.path.display(), "Database ready");

    let cache = gateway::open_cache(&config)
        .await
        .context("Failed to open pin cache")?;

    let gateway = Gateway::start(
        &config,
        cache,
        Arc::new(db.pin_history()),
        Arc::new(db.device_tokens()),
    )
    .await
    .context("Failed to start gateway")?;

    shutdown_signal().await;

    let report = gateway.shutdown().await?;
    if report.timed_out {
        warn!(
            persisted = report.persisted,
            abandoned = report.abandoned,
            "History drain timed out"
        );
    } else {
        info!(persisted = report.persisted, "History drained");
    }

    db.close().await;
    info!("Gateway shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pinhub_sync=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Reads `--config <path>` from the command line.
fn parse_args() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config requires a path"),
            },
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(config)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
