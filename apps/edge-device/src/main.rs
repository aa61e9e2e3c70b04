//! # Stocktag Edge Device
//!
//! Runs the inventory edge device until Ctrl+C or SIGTERM.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. init tracing (RUST_LOG, default info)                              │
//! │  2. DeviceConfig::load_or_default                                      │
//! │  3. open the local store (SQLite, migrations)                          │
//! │  4. Coordinator::start with the hardware ports                         │
//! │  5. wait for a shutdown signal → bounded shutdown                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod simulated;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stocktag_db::{Database, DbConfig, LocalStore};
use stocktag_sync::{Coordinator, DeviceConfig};

use crate::simulated::SimulatedPanel;

/// Bound on each duty's exit after the shutdown signal.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = DeviceConfig::load_or_default(config_path);
    info!(
        device_id = %config.device_id(),
        server_url = %config.link.server_url,
        "Configuration loaded"
    );

    let store_path = config.store_path();
    let db = Database::new(DbConfig::new(store_path.clone()))
        .await
        .with_context(|| format!("opening local store at {}", store_path.display()))?;
    let store = Arc::new(LocalStore::new(db));
    info!(path = %store_path.display(), "Local store ready");

    let panel = SimulatedPanel::new(config.hardware.tag_slot);
    panel.spawn_console();

    let coordinator = Coordinator::start(config, store.clone(), panel.ports())
        .await
        .context("starting device coordinator")?;

    shutdown_signal().await;

    if !coordinator.shutdown(SHUTDOWN_JOIN_TIMEOUT).await {
        warn!("Some duties had to be aborted");
    }
    store.database().close().await;

    info!("Edge device stopped");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=stocktag_sync=trace` - Trace the coordination engine only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
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

    info!("Shutdown signal received, stopping duties");
}
