//! Tallyboard server binary.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tallyboard.yaml` (or `TALLYBOARD_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Remove temporary files left by interrupted snapshot writes
//! 4. Restore the newest valid snapshot, or start empty
//! 5. Compute the historical baseline
//! 6. Start the background tasks
//! 7. Serve HTTP until `Ctrl-C`, then save one final snapshot

use std::path::PathBuf;
use std::sync::Arc;

use tallyboard_core::TallyConfig;
use tallyboard_core::config::LoggingConfig;
use tallyboard_server::{AppState, BackgroundTasks, start_server};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "tallyboard.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server cannot
/// bind its address.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        host = %config.server.host,
        port = config.server.port,
        snapshot_dir = %config.snapshots.directory.display(),
        snapshot_interval_seconds = config.snapshots.interval_seconds,
        retention = config.snapshots.retention,
        "tallyboard-server starting"
    );

    let state = Arc::new(AppState::from_config(&config));

    // 3. Clean up after interrupted saves.
    if let Err(e) = state.snapshots.remove_stale_temp_files().await {
        warn!(error = %e, "Could not clean snapshot directory");
    }

    // 4. Restore.
    state.snapshots.restore(&state.store).await;

    // 5. Baseline.
    state.refresh_baseline().await;

    // 6. Background tasks.
    let tasks = BackgroundTasks::spawn(&state, &config);

    // 7. Serve until Ctrl-C.
    let shutdown = {
        let state = Arc::clone(&state);
        async move {
            shutdown_signal().await;
            // Open streams would otherwise hold graceful shutdown forever.
            state.hub.close_all();
        }
    };
    let served = start_server(&config.server, Arc::clone(&state), shutdown).await;
    tasks.shutdown();

    match state.save_snapshot().await {
        Ok(id) => info!(snapshot = %id, "Final snapshot saved"),
        Err(e) => error!(error = %e, "Final snapshot failed"),
    }

    served?;
    info!("tallyboard-server stopped");
    Ok(())
}

/// Load configuration from `TALLYBOARD_CONFIG` or `tallyboard.yaml`.
///
/// A missing file yields defaults with environment overrides applied.
fn load_config() -> Result<(TallyConfig, PathBuf), tallyboard_core::ConfigError> {
    let path = std::env::var_os("TALLYBOARD_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = if path.exists() {
        TallyConfig::from_file(&path)?
    } else {
        TallyConfig::parse("")?
    };
    Ok((config, path))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal handler, keep serving rather than exit at once.
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining connections");
}
