//! In-memory fake store for hermetic tests.

use std::collections::HashMap;
use std::sync::Mutex;

use forkline_core::Run;

use crate::error::{StoreError, StoreResult};
use crate::storage_traits::{RunListing, RunStore};

/// `RunStore` backed by a `HashMap`, satisfying the trait contract without
/// touching disk. Runs are inserted pre-built.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, Run>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run: Run) {
        let mut runs = self.runs.lock().unwrap();
        runs.insert(run.run_id.clone(), run);
    }
}

impl RunStore for MemoryStore {
    fn load_run(&self, run_id: &str) -> StoreResult<Run> {
        let runs = self.runs.lock().unwrap();
        let run = runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        run.validate()?;
        Ok(run)
    }

    fn list_runs(&self) -> StoreResult<Vec<RunListing>> {
        let runs = self.runs.lock().unwrap();
        let mut listings: Vec<RunListing> = runs
            .values()
            .map(|run| RunListing {
                run_id: run.run_id.clone(),
                entrypoint: String::new(),
                started_at: String::new(),
                ended_at: None,
                status: run.status,
                step_count: run.steps.len(),
                event_count: run.steps.iter().map(|s| s.events.len()).sum(),
            })
            .collect();
        listings.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(listings)
    }
}
