//! Error types for the persistence layer.

use forkline_core::ForklineError;

/// Errors produced by the run store and recorder.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("no active step for run {0}")]
    NoActiveStep(String),

    #[error("run {0} already ended")]
    RunEnded(String),

    #[error(transparent)]
    Core(#[from] ForklineError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
