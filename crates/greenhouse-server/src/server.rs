//! TCP listener lifecycle.
//!
//! [`bind`] opens the configured address; [`serve`] accepts connections
//! until the shutdown signal flips to `true`. Each accepted socket is
//! served on its own task by [`handle_connection`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::config::ServerSection;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::{ConnectionSettings, handle_connection};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;

/// Configuration for the TCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on; `0` picks a free port.
    pub port: u16,
    /// Per-connection limits.
    pub connection: ConnectionSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSection::default())
    }
}

impl From<&ServerSection> for ServerConfig {
    fn from(section: &ServerSection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            connection: ConnectionSettings {
                queue_capacity: section.session_queue_capacity,
                write_timeout: Duration::from_millis(section.write_timeout_ms),
                max_line_bytes: section.max_line_bytes,
            },
        }
    }
}

/// Bind the listener described by `config`.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "Greenhouse server listening");
    }
    Ok(listener)
}

/// Accept connections on `listener` until `shutdown` turns `true` or its
/// sender is dropped.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!(%peer, error = %err, "Failed to set TCP_NODELAY");
                        }
                        let dispatcher = Arc::clone(&dispatcher);
                        tokio::spawn(handle_connection(stream, peer, dispatcher, settings));
                    }
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                    }
                }
            }
        }
    }
    info!("Greenhouse server stopped accepting connections");
    Ok(())
}

/// The address a bound listener actually uses.
pub fn local_addr(listener: &TcpListener) -> Result<SocketAddr, ServerError> {
    listener
        .local_addr()
        .map_err(|e| ServerError::Serve(format!("listener has no local address: {e}")))
}
