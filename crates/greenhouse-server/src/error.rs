//! Error types for the greenhouse server.

/// Errors that can occur when starting or running the TCP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The listener failed while accepting connections.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Errors raised by the user store.
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    /// Reading or writing the user file failed.
    #[error("user store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The user file is not valid JSON or could not be encoded.
    #[error("user store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A user with this name is already registered.
    #[error("user already exists: {0}")]
    Duplicate(String),
}
