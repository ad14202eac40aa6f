//! Error types for nbexec-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for nbexec-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a notebook run.
///
/// A kernel restart is deliberately absent: it is a normal outcome of a run
/// (see [`RunOutcome`](crate::RunOutcome)), not a failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read or write a file.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is not a usable nbformat v4 notebook.
    #[error("invalid notebook: {0}")]
    InvalidNotebook(String),

    /// An optional feature was requested but its collaborator is unavailable.
    #[error("{0}")]
    MissingCollaborator(String),

    /// A cell raised while error tolerance was off.
    #[error("{0}")]
    Execution(String),

    /// Communication with the kernel process failed.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// No kernel is registered under the requested spec name.
    #[error("no kernel registered for kernel spec '{0}'")]
    KernelNotFound(String),

    /// Cache store failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Parameters cannot be expressed in the notebook's language.
    #[error("no parameter translator for language '{0}'")]
    UnsupportedLanguage(String),
}

impl Error {
    /// Attach a path to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
