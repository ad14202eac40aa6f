//! Error types for the nbexec server.

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the execution core.
    #[error("Core error: {0}")]
    Core(#[from] nbexec_core::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured host and port do not form a socket address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The blocking execution worker did not return.
    #[error("Execution worker failed: {0}")]
    Worker(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
