//! Greenhouse telemetry server binary.
//!
//! Wires the node manager, sensor engine, session registry and user store
//! together behind the TCP listener, then serves until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `greenhouse-config.yaml` (or `GREENHOUSE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the user store
//! 4. Create node manager, session registry and sensor engine
//! 5. Create and schedule the configured seed nodes
//! 6. Bind the listener and accept connections
//! 7. On `Ctrl-C`, stop accepting and cancel every ticker

mod error;
mod forwarder;

use std::path::PathBuf;
use std::sync::Arc;

use greenhouse_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, LoggingConfig};
use greenhouse_core::{GreenhouseConfig, LogFormat, NodeManager, SensorEngine};
use greenhouse_server::{ClientRegistry, Dispatcher, FileUserService, ServerConfig};
use greenhouse_types::SensorUpdate;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;
use crate::forwarder::spawn_update_forwarder;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the user store or the listener
/// cannot be set up.
#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // 1. Load configuration.
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
    let config = GreenhouseConfig::load_or_default(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        host = config.server.host,
        port = config.server.port,
        default_interval_ms = config.sampling.default_interval_ms,
        seed_nodes = config.seed_nodes.len(),
        "greenhouse-daemon starting"
    );

    // 3. Open the user store.
    let users = Arc::new(FileUserService::open(&config.users.file)?);

    // 4. Core services.
    let nodes = Arc::new(NodeManager::new(config.sampling.default_interval_ms));
    let registry = Arc::new(ClientRegistry::new());
    let (update_tx, update_rx) =
        mpsc::channel::<SensorUpdate>(config.sampling.update_queue_capacity.max(1));
    let engine = Arc::new(SensorEngine::new(Arc::clone(&nodes), update_tx));
    let forwarder = spawn_update_forwarder(Arc::clone(&nodes), Arc::clone(&registry), update_rx);

    // 5. Seed nodes.
    for spec in config.seed_nodes.iter().cloned() {
        let id = nodes.add_node(spec).await;
        engine.schedule_node(&id).await;
    }
    info!(nodes = nodes.len().await, "Seed nodes scheduled");

    // 6. Serve.
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&nodes),
        Arc::clone(&engine),
        Arc::clone(&registry),
        users,
        config.server.name.clone(),
    ));
    let server_config = ServerConfig::from(&config.server);
    let listener = greenhouse_server::bind(&server_config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(greenhouse_server::serve(
        listener,
        dispatcher,
        server_config.connection,
        shutdown_rx,
    ));

    // 7. Wait for Ctrl-C, then shut down.
    let signal = tokio::signal::ctrl_c().await;
    if let Err(e) = &signal {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    engine.close();

    match server.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Server task ended abnormally"),
    }
    drop(engine);
    forwarder.abort();

    signal.map_err(|e| DaemonError::Signal {
        message: format!("{e}"),
    })?;
    info!("greenhouse-daemon shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
