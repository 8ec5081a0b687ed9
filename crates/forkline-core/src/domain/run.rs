//! Run, step, and event records.

use serde::{Deserialize, Serialize};

use crate::domain::error::{ForklineError, Result};
use crate::domain::value::Value;

/// Event type consumed as a step input.
pub const INPUT_EVENT: &str = "input";
/// Event type produced as a step output.
pub const OUTPUT_EVENT: &str = "output";
/// Event type marking a step failure.
pub const ERROR_EVENT: &str = "error";

/// Terminal (or pending) status of a recorded run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
    Error,
    /// The run has not been ended yet. The comparison engine treats missing
    /// trailing steps of a pending run as a length mismatch.
    Pending,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Error => "error",
            RunStatus::Pending => "pending",
        }
    }
}

/// A single labeled payload within a step.
///
/// `type` is an uninterpreted label; `input`, `output`, and `error` carry
/// special meaning to the divergence engine, everything else is "other".
/// The timestamp is metadata and never participates in comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub timestamp: String,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value, timestamp: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: timestamp.into(),
        }
    }
}

/// One logical operation in a run, with its ordered event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Position of the step in its run; equals its index in `Run::steps`.
    pub idx: usize,
    pub name: String,
    pub events: Vec<Event>,
}

impl Step {
    pub fn new(idx: usize, name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            idx,
            name: name.into(),
            events,
        }
    }

    /// Payloads of all events of `event_type`, in insertion order.
    pub fn payloads_of_type(&self, event_type: &str) -> Vec<&Value> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| &e.payload)
            .collect()
    }

    /// Whether the step recorded at least one `error` event.
    pub fn has_error(&self) -> bool {
        self.events.iter().any(|e| e.event_type == ERROR_EVENT)
    }
}

/// A recorded execution: ordered steps, each with ordered events.
///
/// Runs are immutable once ended; the core never mutates a `Run` it is given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub schema_version: String,
    pub steps: Vec<Step>,
    pub env_fingerprint: Value,
    pub status: RunStatus,
}

impl Run {
    pub fn new(
        run_id: impl Into<String>,
        schema_version: impl Into<String>,
        steps: Vec<Step>,
        env_fingerprint: Value,
        status: RunStatus,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            schema_version: schema_version.into(),
            steps,
            env_fingerprint,
            status,
        }
    }

    /// Check the data-model invariants: step indices form `0..n` with no
    /// gaps, and every step carries a name.
    pub fn validate(&self) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            if step.idx != i {
                return Err(ForklineError::CorruptRun {
                    run_id: self.run_id.clone(),
                    detail: format!("step index gap: expected {}, found {}", i, step.idx),
                });
            }
            if step.name.is_empty() {
                return Err(ForklineError::CorruptRun {
                    run_id: self.run_id.clone(),
                    detail: format!("step {} has an empty name", i),
                });
            }
        }
        Ok(())
    }
}
