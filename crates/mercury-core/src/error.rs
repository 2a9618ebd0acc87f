//! Error types for mercury-core.

use thiserror::Error;

/// Result type for mercury-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mercury-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Working directory does not exist on the target.
    #[error("directory does not exist: {0}")]
    DirectoryNotExist(String),

    /// Path does not exist on the target.
    #[error("path does not exist: {0}")]
    PathNotExist(String),

    /// Invalid combination of run options.
    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    /// Failure in the pseudo-terminal channel.
    #[error("pty error: {0}")]
    Pty(String),

    /// A filesystem or exec operation inside a container failed.
    #[error("container error: {0}")]
    Container(String),

    /// No usable shell was found on the target.
    #[error("no usable shell found (probed: {0})")]
    ShellNotFound(String),

    /// Session protocol failure (prompt never confirmed, process gone, ...).
    #[error("session error: {0}")]
    Session(String),

    /// Session process died and re-creation attempts were exhausted.
    #[error("session '{id}' is dead and could not be re-created after {attempts} attempts")]
    SessionRetriesExhausted { id: String, attempts: u32 },

    /// Build tool invocation failed.
    #[error("build tool error: {0}")]
    BuildTool(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
