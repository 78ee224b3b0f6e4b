//! Error types for the daemon binary.

/// Top-level error for the daemon.
///
/// Each variant wraps a subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: greenhouse_core::ConfigError,
    },

    /// The user store could not be opened.
    #[error("user store error: {source}")]
    Users {
        /// The underlying user store error.
        #[from]
        source: greenhouse_server::UserError,
    },

    /// The TCP server failed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: greenhouse_server::ServerError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },
}
