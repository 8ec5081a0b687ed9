//! First-divergence engine.
//!
//! Walks two recorded runs in lockstep and returns the FIRST point at which
//! they cease to agree, classified by strict priority:
//! operation > input > error state > output > remaining events.
//!
//! On a name mismatch the engine probes a bounded window for a nearby pair of
//! steps sharing a soft signature (name + input hash), which distinguishes a
//! single inserted or deleted step from a genuine reordering without paying
//! for full edit-distance alignment. The engine halts at the first divergence;
//! cascading differences are by definition downstream of root cause.
//!
//! The result is deterministic: for a fixed `(run_a, run_b, config)` the
//! serialized output is byte-identical across invocations and machines.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canon::canonical_hash;
use crate::diff::{diff_values, DiffOp};
use crate::domain::error::Result;
use crate::domain::run::{Run, Step, ERROR_EVENT, INPUT_EVENT, OUTPUT_EVENT};
use crate::domain::value::Value;

/// Classification of the first point of divergence between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceStatus {
    ExactMatch,
    OpDivergence,
    InputDivergence,
    OutputDivergence,
    ErrorDivergence,
    MissingSteps,
    ExtraSteps,
}

impl DivergenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceStatus::ExactMatch => "exact_match",
            DivergenceStatus::OpDivergence => "op_divergence",
            DivergenceStatus::InputDivergence => "input_divergence",
            DivergenceStatus::OutputDivergence => "output_divergence",
            DivergenceStatus::ErrorDivergence => "error_divergence",
            DivergenceStatus::MissingSteps => "missing_steps",
            DivergenceStatus::ExtraSteps => "extra_steps",
        }
    }
}

impl fmt::Display for DivergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which structured diffs to include in the result. Classification is
/// unaffected; the filter only suppresses returned diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowFilter {
    Input,
    Output,
    #[default]
    Both,
}

impl ShowFilter {
    fn wants_input(&self) -> bool {
        matches!(self, ShowFilter::Input | ShowFilter::Both)
    }

    fn wants_output(&self) -> bool {
        matches!(self, ShowFilter::Output | ShowFilter::Both)
    }
}

impl std::str::FromStr for ShowFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(ShowFilter::Input),
            "output" => Ok(ShowFilter::Output),
            "both" => Ok(ShowFilter::Both),
            other => Err(format!("unknown show filter: {other}")),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DivergenceConfig {
    /// Resync window size.
    pub window: usize,
    /// Steps of context on each side of the divergence.
    pub context_size: usize,
    pub show: ShowFilter,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            window: 10,
            context_size: 2,
            show: ShowFilter::Both,
        }
    }
}

/// Compact summary of a step for inclusion in results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub idx: usize,
    pub name: String,
    pub input_hash: String,
    pub output_hash: String,
    pub event_count: usize,
    pub has_error: bool,
}

/// Result of a first-divergence comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceResult {
    pub status: DivergenceStatus,
    /// Divergence index in run A; the step count on `exact_match`, the first
    /// index beyond the shorter run on a trailing length mismatch.
    pub idx_a: usize,
    /// Divergence index in run B, same conventions as `idx_a`.
    pub idx_b: usize,
    pub explanation: String,
    /// Index of the last step compared equal; `-1` if none.
    pub last_equal_idx: i64,
    pub old_step: Option<StepSummary>,
    pub new_step: Option<StepSummary>,
    pub input_diff: Option<Vec<DiffOp>>,
    pub output_diff: Option<Vec<DiffOp>>,
    pub context_a: Vec<StepSummary>,
    pub context_b: Vec<StepSummary>,
}

// ---------------------------------------------------------------------------
// Step fingerprints
// ---------------------------------------------------------------------------

/// Derived identity of a step; recomputed on demand, never persisted.
struct Fingerprint {
    name: String,
    input_hash: String,
    output_hash: String,
    has_error: bool,
    error_hash: String,
    events_hash: String,
    event_count: usize,
    idx: usize,
}

impl Fingerprint {
    fn summary(&self) -> StepSummary {
        StepSummary {
            idx: self.idx,
            name: self.name.clone(),
            input_hash: self.input_hash.clone(),
            output_hash: self.output_hash.clone(),
            event_count: self.event_count,
            has_error: self.has_error,
        }
    }

    /// Soft signature used by resync: `(name, input_hash)`.
    fn soft_matches(&self, other: &Fingerprint) -> bool {
        self.name == other.name && self.input_hash == other.input_hash
    }
}

/// Payloads of all events of `event_type`, concatenated as a sequence in
/// insertion order.
fn aggregate_payloads(step: &Step, event_type: &str) -> Value {
    Value::Seq(
        step.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| e.payload.clone())
            .collect(),
    )
}

/// The full ordered event list as `(type, payload)` pairs; timestamps are
/// metadata and excluded.
fn event_sequence(step: &Step) -> Value {
    Value::Seq(
        step.events
            .iter()
            .map(|e| {
                Value::Seq(vec![
                    Value::Str(e.event_type.clone()),
                    e.payload.clone(),
                ])
            })
            .collect(),
    )
}

fn fingerprint(step: &Step) -> Result<Fingerprint> {
    Ok(Fingerprint {
        name: step.name.clone(),
        input_hash: canonical_hash(&aggregate_payloads(step, INPUT_EVENT))?,
        output_hash: canonical_hash(&aggregate_payloads(step, OUTPUT_EVENT))?,
        has_error: step.has_error(),
        error_hash: canonical_hash(&aggregate_payloads(step, ERROR_EVENT))?,
        events_hash: canonical_hash(&event_sequence(step))?,
        event_count: step.events.len(),
        idx: step.idx,
    })
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMismatch {
    Equal,
    Name,
    Input,
    Error,
    Output,
    /// Inputs, outputs, and error state agree but the full event list differs
    /// (e.g. a `tool_call` payload changed).
    Events,
}

fn classify(a: &Fingerprint, b: &Fingerprint) -> StepMismatch {
    if a.name != b.name {
        StepMismatch::Name
    } else if a.input_hash != b.input_hash {
        StepMismatch::Input
    } else if a.has_error != b.has_error {
        StepMismatch::Error
    } else if a.has_error && a.error_hash != b.error_hash {
        StepMismatch::Error
    } else if a.output_hash != b.output_hash {
        StepMismatch::Output
    } else if a.events_hash != b.events_hash {
        StepMismatch::Events
    } else {
        StepMismatch::Equal
    }
}

// ---------------------------------------------------------------------------
// Resync
// ---------------------------------------------------------------------------

/// Find the nearest pair `(start+da, start+db)` with matching soft signatures,
/// `da, db ∈ {0..=window}`, `(da, db) ≠ (0, 0)`. Nearest is ordered by
/// `da + db` ascending, ties by `da` ascending.
fn resync(
    fps_a: &[Fingerprint],
    fps_b: &[Fingerprint],
    start: usize,
    window: usize,
) -> Option<(usize, usize)> {
    for total in 1..=window.saturating_mul(2) {
        for da in 0..=total.min(window) {
            let db = total - da;
            if db > window {
                continue;
            }
            let ia = start + da;
            let ib = start + db;
            if ia >= fps_a.len() || ib >= fps_b.len() {
                continue;
            }
            if fps_a[ia].soft_matches(&fps_b[ib]) {
                return Some((da, db));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Explanations
// ---------------------------------------------------------------------------

fn missing_explanation(first: usize, last: usize) -> String {
    if last > first {
        format!("Steps {first}..{last} from run_a missing in run_b")
    } else {
        format!("Step {first} from run_a missing in run_b")
    }
}

fn extra_explanation(first: usize, last: usize) -> String {
    if last > first {
        format!("Steps {first}..{last} in run_b not present in run_a")
    } else {
        format!("Step {first} in run_b not present in run_a")
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn context_window(fps: &[Fingerprint], center: usize, size: usize) -> Vec<StepSummary> {
    if fps.is_empty() {
        return Vec::new();
    }
    let center = center.min(fps.len() - 1);
    let start = center.saturating_sub(size);
    let end = (center + size + 1).min(fps.len());
    fps[start..end].iter().map(Fingerprint::summary).collect()
}

/// Find the first point of divergence between `run_a` (baseline) and `run_b`.
///
/// Total over well-formed runs; the only failure path is the canonical
/// recursion-depth bound. Never mutates its inputs and never reports a
/// second divergence.
pub fn find_first_divergence(
    run_a: &Run,
    run_b: &Run,
    config: &DivergenceConfig,
) -> Result<DivergenceResult> {
    let fps_a: Vec<Fingerprint> = run_a.steps.iter().map(fingerprint).collect::<Result<_>>()?;
    let fps_b: Vec<Fingerprint> = run_b.steps.iter().map(fingerprint).collect::<Result<_>>()?;

    let len_a = fps_a.len();
    let len_b = fps_b.len();
    let shared = len_a.min(len_b);
    let mut last_equal: i64 = -1;

    for i in 0..shared {
        let mismatch = classify(&fps_a[i], &fps_b[i]);
        if mismatch == StepMismatch::Equal {
            last_equal = i as i64;
            continue;
        }

        if mismatch == StepMismatch::Name {
            if let Some((da, db)) = resync(&fps_a, &fps_b, i, config.window) {
                debug!(
                    event = "divergence.resync",
                    idx = i,
                    offset_a = da,
                    offset_b = db
                );
                if da > 0 && db == 0 {
                    return Ok(DivergenceResult {
                        status: DivergenceStatus::MissingSteps,
                        idx_a: i,
                        idx_b: i,
                        explanation: missing_explanation(i, i + da - 1),
                        last_equal_idx: last_equal,
                        old_step: Some(fps_a[i].summary()),
                        new_step: Some(fps_b[i].summary()),
                        input_diff: None,
                        output_diff: None,
                        context_a: context_window(&fps_a, i, config.context_size),
                        context_b: context_window(&fps_b, i, config.context_size),
                    });
                }
                if db > 0 && da == 0 {
                    return Ok(DivergenceResult {
                        status: DivergenceStatus::ExtraSteps,
                        idx_a: i,
                        idx_b: i,
                        explanation: extra_explanation(i, i + db - 1),
                        last_equal_idx: last_equal,
                        old_step: Some(fps_a[i].summary()),
                        new_step: Some(fps_b[i].summary()),
                        input_diff: None,
                        output_diff: None,
                        context_a: context_window(&fps_a, i, config.context_size),
                        context_b: context_window(&fps_b, i, config.context_size),
                    });
                }
                // Both offsets positive: the steps were replaced, not
                // inserted or deleted. Classify at the current position.
            }
        }

        return classified_result(run_a, run_b, &fps_a, &fps_b, i, mismatch, last_equal, config);
    }

    if len_a > len_b {
        let idx = len_b;
        return Ok(DivergenceResult {
            status: DivergenceStatus::MissingSteps,
            idx_a: idx,
            idx_b: idx,
            explanation: missing_explanation(idx, len_a - 1),
            last_equal_idx: last_equal,
            old_step: Some(fps_a[idx].summary()),
            new_step: None,
            input_diff: None,
            output_diff: None,
            context_a: context_window(&fps_a, idx, config.context_size),
            context_b: context_window(&fps_b, len_b.saturating_sub(1), config.context_size),
        });
    }

    if len_b > len_a {
        let idx = len_a;
        return Ok(DivergenceResult {
            status: DivergenceStatus::ExtraSteps,
            idx_a: idx,
            idx_b: idx,
            explanation: extra_explanation(idx, len_b - 1),
            last_equal_idx: last_equal,
            old_step: None,
            new_step: Some(fps_b[idx].summary()),
            input_diff: None,
            output_diff: None,
            context_a: context_window(&fps_a, len_a.saturating_sub(1), config.context_size),
            context_b: context_window(&fps_b, idx, config.context_size),
        });
    }

    debug!(event = "divergence.exact_match", steps = len_a);
    Ok(DivergenceResult {
        status: DivergenceStatus::ExactMatch,
        idx_a: len_a,
        idx_b: len_b,
        explanation: format!("Runs are identical ({len_a} steps compared)"),
        last_equal_idx: last_equal,
        old_step: None,
        new_step: None,
        input_diff: None,
        output_diff: None,
        context_a: Vec::new(),
        context_b: Vec::new(),
    })
}

#[allow(clippy::too_many_arguments)]
fn classified_result(
    run_a: &Run,
    run_b: &Run,
    fps_a: &[Fingerprint],
    fps_b: &[Fingerprint],
    i: usize,
    mismatch: StepMismatch,
    last_equal: i64,
    config: &DivergenceConfig,
) -> Result<DivergenceResult> {
    let step_a = &run_a.steps[i];
    let step_b = &run_b.steps[i];
    let name = &step_a.name;

    let (status, explanation) = match mismatch {
        StepMismatch::Name => (
            DivergenceStatus::OpDivergence,
            format!(
                "Step {i}: operation mismatch ('{}' vs '{}')",
                step_a.name, step_b.name
            ),
        ),
        StepMismatch::Input => (
            DivergenceStatus::InputDivergence,
            format!("Step {i} '{name}': input differs"),
        ),
        StepMismatch::Error => (
            DivergenceStatus::ErrorDivergence,
            format!("Step {i} '{name}': error state differs"),
        ),
        StepMismatch::Output | StepMismatch::Events => (
            DivergenceStatus::OutputDivergence,
            format!("Step {i} '{name}': output differs (same input)"),
        ),
        StepMismatch::Equal => unreachable!("classified_result called on equal steps"),
    };

    let input_diff = if mismatch == StepMismatch::Input && config.show.wants_input() {
        Some(diff_values(
            &aggregate_payloads(step_a, INPUT_EVENT),
            &aggregate_payloads(step_b, INPUT_EVENT),
        ))
    } else {
        None
    };

    let output_diff = if config.show.wants_output() {
        match mismatch {
            StepMismatch::Output => Some(diff_values(
                &aggregate_payloads(step_a, OUTPUT_EVENT),
                &aggregate_payloads(step_b, OUTPUT_EVENT),
            )),
            // The aggregated outputs agree, so explain the divergence over
            // the full event sequences instead.
            StepMismatch::Events => Some(diff_values(
                &event_sequence(step_a),
                &event_sequence(step_b),
            )),
            _ => None,
        }
    } else {
        None
    };

    debug!(event = "divergence.classified", status = %status, idx = i);

    Ok(DivergenceResult {
        status,
        idx_a: i,
        idx_b: i,
        explanation,
        last_equal_idx: last_equal,
        old_step: Some(fps_a[i].summary()),
        new_step: Some(fps_b[i].summary()),
        input_diff,
        output_diff,
        context_a: context_window(fps_a, i, config.context_size),
        context_b: context_window(fps_b, i, config.context_size),
    })
}
