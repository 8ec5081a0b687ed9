//! Forkline core — the deterministic comparison pipeline.
//!
//! Records of agentic workflow runs are compared offline, read-only, and
//! deterministically: canonicalization gives every payload a stable byte
//! identity, the structural differ explains a classified divergence, the
//! redaction engine guards the storage boundary, and the first-divergence
//! engine walks two runs in lockstep to find where they first disagree.
//!
//! The crate is synchronous and pure: no file, network, clock, or RNG access.

pub mod canon;
pub mod diff;
pub mod divergence;
pub mod domain;
pub mod redact;

pub use canon::{
    bytes_preview, canonical_bytes, canonical_bytes_bounded, canonical_hash, normalize_str,
    sha256_hex, DEFAULT_MAX_DEPTH,
};
pub use diff::{diff_values, DiffOp};
pub use divergence::{
    find_first_divergence, DivergenceConfig, DivergenceResult, DivergenceStatus, ShowFilter,
    StepSummary,
};
pub use domain::error::{ForklineError, Result};
pub use domain::run::{Event, Run, RunStatus, Step, ERROR_EVENT, INPUT_EVENT, OUTPUT_EVENT};
pub use domain::value::Value;
pub use redact::{
    RedactAction, RedactRule, RedactionMode, RedactionPolicy, REDACTED, SECRET_KEY_PATTERNS,
    STRUCTURAL_ALLOWLIST,
};
