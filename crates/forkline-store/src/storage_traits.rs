//! Storage trait consumed by the comparison engine.
//!
//! The store is an external collaborator of the core: it must hand the engine
//! fully materialized `Run`s satisfying the data-model invariants, totally
//! ordered within each run, and must never surface a partially written run.

use forkline_core::{Run, RunStatus};
use serde::Serialize;

use crate::error::StoreResult;

/// One row of `list_runs` output.
#[derive(Debug, Clone, Serialize)]
pub struct RunListing {
    pub run_id: String,
    pub entrypoint: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub step_count: usize,
    pub event_count: usize,
}

/// Read access to recorded runs.
pub trait RunStore: Send + Sync {
    /// Load a run with all steps and events. Fails with
    /// `StoreError::RunNotFound` if the id is unknown, or
    /// `ForklineError::CorruptRun` if the stored rows violate the run
    /// invariants.
    fn load_run(&self, run_id: &str) -> StoreResult<Run>;

    /// Summaries of all recorded runs, ordered by start time then id.
    fn list_runs(&self) -> StoreResult<Vec<RunListing>>;
}
