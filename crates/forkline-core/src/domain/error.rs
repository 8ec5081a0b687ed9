//! Forkline error taxonomy.

/// Errors produced by the Forkline core.
#[derive(Debug, thiserror::Error)]
pub enum ForklineError {
    /// The store could not resolve a run id.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// A value outside the Value grammar reached the canonicalizer, or the
    /// recursion depth bound was exceeded.
    #[error("bad value kind: {0}")]
    BadValueKind(String),

    /// A redaction policy is malformed. Raised at construction, never while
    /// redacting.
    #[error("invalid redaction policy: {0}")]
    PolicyError(String),

    /// A loaded run violates the data-model invariants.
    #[error("corrupt run '{run_id}': {detail}")]
    CorruptRun { run_id: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Forkline core operations.
pub type Result<T> = std::result::Result<T, ForklineError>;
