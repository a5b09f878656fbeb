//! Industrial simulation server binary.
//!
//! This is the main entry point that wires together configuration, the
//! server lifecycle, and the periodic factory monitor. It runs until
//! Ctrl-C, then shuts everything down in order.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `plantsim-config.yaml` (or `PLANTSIM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Start the server: build the factory and start the tick thread
//! 4. Open a session and spawn the monitor task
//! 5. Wait for Ctrl-C
//! 6. Stop the monitor, then stop the server on a blocking thread
//! 7. Log the final status

mod error;
mod monitor;

use std::path::PathBuf;

use plantsim_core::{EndpointConfig, PlantConfig, ServerLifecycle, Session};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "plantsim-config.yaml";

/// Application entry point for the simulation server.
///
/// # Errors
///
/// Returns an error if configuration, startup, or shutdown fails.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // 1. Load configuration. Logging is not up yet; remember where it came
    //    from and report it once the subscriber is installed.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("plantsim-server starting");
    info!(
        source = %source,
        name = %config.server.name,
        endpoint = %config.server.endpoint,
        tick_interval_ms = config.simulation.tick_interval_ms,
        sensors = config.simulation.sensors.len(),
        motors = config.simulation.motors.len(),
        "Configuration loaded"
    );

    // 3. Start the server.
    let monitor_config = config.monitor.clone();
    let endpoint = EndpointConfig::from_server(&config.server);
    let mut lifecycle = ServerLifecycle::new(config);
    lifecycle.start()?;

    // 4. Spawn the monitor.
    let session = Session::open(&lifecycle, &endpoint)?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let monitor_handle = tokio::spawn(monitor::run_monitor(
        session,
        monitor_config,
        shutdown_rx,
        monitor::log_reading,
    ));
    info!("Server is running. Press Ctrl+C to stop.");

    // 5. Wait for Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| ServerError::Signal { source })?;
    info!("Shutdown requested");

    // 6. Stop the monitor, then the server. Stopping waits on the tick
    //    thread, so it runs off the async workers.
    // The monitor may already have exited on its own.
    let _ = shutdown_tx.send(());
    monitor_handle.await?;

    let (lifecycle, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = lifecycle.stop();
        (lifecycle, outcome)
    })
    .await?;

    // 7. Log the final status.
    let status = serde_json::to_string(&lifecycle.status())?;
    info!(?outcome, status = %status, "plantsim-server shutdown complete");

    Ok(())
}

/// Load configuration from `PLANTSIM_CONFIG` or `plantsim-config.yaml`.
///
/// A missing file falls back to defaults, still honoring the environment
/// overrides. Returns the config and a description of where it came from.
fn load_config() -> Result<(PlantConfig, String), ServerError> {
    let path = std::env::var_os("PLANTSIM_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = PlantConfig::from_file(&path)?;
        Ok((config, path.display().to_string()))
    } else {
        let mut config = PlantConfig::default();
        config.server.apply_env_overrides();
        config.validate()?;
        Ok((config, "defaults".to_owned()))
    }
}
