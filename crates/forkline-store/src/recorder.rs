//! Run recording: the write side of the store.
//!
//! Explicit, boring, append-only. A [`RunRecorder`] is bound to one run:
//! start it, open steps, log events, end it. Every payload flows through the
//! recorder's [`RedactionPolicy`] before persistence — this is the single
//! authorized write path to the store.

use std::sync::Arc;

use tracing::{debug, info};

use forkline_core::{ForklineError, RedactionMode, RedactionPolicy, RunStatus, Value};

use crate::error::{StoreError, StoreResult};
use crate::store::SqliteStore;

/// ISO8601 UTC timestamp.
fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Capture the environment fingerprint stored with each run.
pub fn capture_env_fingerprint() -> Value {
    let mut map = std::collections::BTreeMap::new();
    map.insert("os".to_string(), Value::from(std::env::consts::OS));
    map.insert("arch".to_string(), Value::from(std::env::consts::ARCH));
    map.insert("family".to_string(), Value::from(std::env::consts::FAMILY));
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    map.insert("cwd".to_string(), Value::from(cwd));
    Value::Map(map)
}

/// Records one run into a [`SqliteStore`].
///
/// Usage:
/// 1. [`RunRecorder::start`] creates the run row.
/// 2. [`RunRecorder::start_step`] / [`RunRecorder::end_step`] scope steps
///    (or use [`RunRecorder::with_step`]).
/// 3. [`RunRecorder::log_event`] appends redacted events to the open step.
/// 4. [`RunRecorder::end_run`] finalizes the status.
#[derive(Debug)]
pub struct RunRecorder {
    store: Arc<SqliteStore>,
    policy: RedactionPolicy,
    run_id: String,
    active_step: Option<usize>,
    next_step_idx: usize,
}

impl RunRecorder {
    /// Start a run under the default SAFE redaction policy.
    pub fn start(store: Arc<SqliteStore>, entrypoint: &str) -> StoreResult<Self> {
        Self::start_with_mode(store, entrypoint, RedactionMode::Safe, false)
    }

    /// Start a run under an explicit redaction mode.
    ///
    /// `RedactionMode::Debug` persists raw payloads and is refused unless
    /// `allow_debug` is set.
    pub fn start_with_mode(
        store: Arc<SqliteStore>,
        entrypoint: &str,
        mode: RedactionMode,
        allow_debug: bool,
    ) -> StoreResult<Self> {
        if mode == RedactionMode::Debug && !allow_debug {
            return Err(ForklineError::PolicyError(
                "debug redaction mode must be explicitly enabled".to_string(),
            )
            .into());
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let env = capture_env_fingerprint();
        store.insert_run(&run_id, entrypoint, &utc_now(), &env)?;
        info!(event = "run.started", run_id = %run_id, entrypoint = %entrypoint);
        Ok(Self {
            store,
            policy: mode.policy(),
            run_id,
            active_step: None,
            next_step_idx: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Open the next step. Any previously open step is closed first.
    pub fn start_step(&mut self, name: &str) -> StoreResult<usize> {
        if self.active_step.is_some() {
            self.end_step()?;
        }
        let idx = self.next_step_idx;
        self.store.insert_step(&self.run_id, idx, name, &utc_now())?;
        self.next_step_idx += 1;
        self.active_step = Some(idx);
        debug!(event = "run.step_started", run_id = %self.run_id, idx, name = %name);
        Ok(idx)
    }

    /// Close the open step.
    pub fn end_step(&mut self) -> StoreResult<()> {
        let idx = self
            .active_step
            .take()
            .ok_or_else(|| StoreError::NoActiveStep(self.run_id.clone()))?;
        self.store.end_step(&self.run_id, idx, &utc_now())
    }

    /// Run `body` inside a named step, closing it afterwards.
    pub fn with_step<T>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.start_step(name)?;
        let result = body(self);
        self.end_step()?;
        result
    }

    /// Append an event to the open step. The payload is redacted before it
    /// reaches the store; the caller's value is untouched.
    pub fn log_event(&mut self, event_type: &str, payload: &Value) -> StoreResult<()> {
        let idx = self
            .active_step
            .ok_or_else(|| StoreError::NoActiveStep(self.run_id.clone()))?;
        let redacted = self.policy.redact(payload)?;
        self.store
            .insert_event(&self.run_id, idx, event_type, &redacted, &utc_now())?;
        debug!(event = "run.event_appended", run_id = %self.run_id, step = idx, kind = %event_type);
        Ok(())
    }

    /// Finalize the run with a terminal status. Consumes the recorder; the
    /// run is immutable afterwards.
    pub fn end_run(mut self, status: RunStatus) -> StoreResult<()> {
        if self.active_step.is_some() {
            self.end_step()?;
        }
        self.store.finish_run(&self.run_id, &utc_now(), status)?;
        info!(event = "run.finished", run_id = %self.run_id, status = %status.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory().expect("open"))
    }

    #[test]
    fn test_debug_mode_requires_explicit_enable() {
        match RunRecorder::start_with_mode(store(), "demo", RedactionMode::Debug, false) {
            Err(StoreError::Core(ForklineError::PolicyError(msg))) => {
                assert!(msg.contains("explicitly enabled"));
            }
            other => panic!("expected PolicyError, got {:?}", other),
        }
        assert!(
            RunRecorder::start_with_mode(store(), "demo", RedactionMode::Debug, true).is_ok()
        );
    }

    #[test]
    fn test_log_event_requires_active_step() {
        let mut recorder = RunRecorder::start(store(), "demo").expect("start");
        match recorder.log_event("input", &Value::Null) {
            Err(StoreError::NoActiveStep(_)) => {}
            other => panic!("expected NoActiveStep, got {:?}", other),
        }
    }

    #[test]
    fn test_env_fingerprint_shape() {
        let env = capture_env_fingerprint();
        assert!(env.get("os").is_some());
        assert!(env.get("arch").is_some());
        assert!(env.get("family").is_some());
        assert!(env.get("cwd").is_some());
    }
}
