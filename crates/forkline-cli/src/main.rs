//! Forkline CLI — forensic diffing of recorded agentic workflow runs.
//!
//! ## Commands
//!
//! - `diff`: compare two recorded runs and report their first divergence
//! - `runs`: list recorded runs in a database
//!
//! Exit codes: `0` when the runs match exactly, `1` on any divergence, `2`
//! on operational failure (run not found, corrupt store, bad arguments).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use forkline_core::{
    find_first_divergence, DiffOp, DivergenceConfig, DivergenceResult, DivergenceStatus,
    ShowFilter,
};
use forkline_store::{RunStore, SqliteStore};

mod telemetry;

#[derive(Parser)]
#[command(name = "forkline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replay-first tracing and diffing for agentic workflows", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two recorded runs and report their first divergence
    Diff {
        /// Show first divergence only (the default and only mode)
        #[arg(long)]
        first: bool,

        /// Run ID for baseline
        run_a: String,

        /// Run ID for comparison
        run_b: String,

        /// Resync window size
        #[arg(long, default_value_t = 10)]
        window: usize,

        /// Steps of context on each side of the divergence
        #[arg(long, default_value_t = 2)]
        context: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,

        /// Which diffs to include
        #[arg(long, value_enum, default_value_t = ShowArg::Both)]
        show: ShowArg,

        /// Canonicalization profile
        #[arg(long, value_enum, default_value_t = CanonArg::Strict)]
        canon: CanonArg,

        /// Path to the SQLite database
        #[arg(long, default_value = "forkline.db")]
        db: PathBuf,
    },

    /// List recorded runs
    Runs {
        /// Path to the SQLite database
        #[arg(long, default_value = "forkline.db")]
        db: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ShowArg {
    Input,
    Output,
    Both,
}

impl From<ShowArg> for ShowFilter {
    fn from(arg: ShowArg) -> Self {
        match arg {
            ShowArg::Input => ShowFilter::Input,
            ShowArg::Output => ShowFilter::Output,
            ShowArg::Both => ShowFilter::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CanonArg {
    Strict,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    telemetry::init_tracing(cli.json, level);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Diff {
            run_a,
            run_b,
            window,
            context,
            format,
            show,
            db,
            ..
        } => cmd_diff(&run_a, &run_b, window, context, format, show, &db),
        Commands::Runs { db } => cmd_runs(&db),
    }
}

fn cmd_diff(
    run_a_id: &str,
    run_b_id: &str,
    window: usize,
    context: usize,
    format: FormatArg,
    show: ShowArg,
    db: &PathBuf,
) -> Result<ExitCode> {
    let store = SqliteStore::open(db).with_context(|| format!("opening {}", db.display()))?;

    let run_a = store
        .load_run(run_a_id)
        .with_context(|| format!("loading run '{run_a_id}' from {}", db.display()))?;
    let run_b = store
        .load_run(run_b_id)
        .with_context(|| format!("loading run '{run_b_id}' from {}", db.display()))?;

    let config = DivergenceConfig {
        window,
        context_size: context,
        show: show.into(),
    };
    let result = find_first_divergence(&run_a, &run_b, &config)?;
    info!(event = "diff.completed", status = %result.status, idx_a = result.idx_a);

    match format {
        FormatArg::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        FormatArg::Text => println!("{}", render_text(&result)),
    }

    Ok(if result.status == DivergenceStatus::ExactMatch {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_runs(db: &PathBuf) -> Result<ExitCode> {
    let store = SqliteStore::open(db).with_context(|| format!("opening {}", db.display()))?;
    let listings = store.list_runs()?;

    if listings.is_empty() {
        println!("no recorded runs in {}", db.display());
        return Ok(ExitCode::SUCCESS);
    }
    for l in &listings {
        println!(
            "{}  {:8}  steps={:<3} events={:<4} started={}  {}",
            l.run_id,
            l.status.as_str(),
            l.step_count,
            l.event_count,
            l.started_at,
            l.entrypoint,
        );
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Text formatter
// ---------------------------------------------------------------------------

const MAX_DIFF_OPS_SHOWN: usize = 10;
const MAX_VALUE_WIDTH: usize = 40;

fn truncate(text: String) -> String {
    if text.chars().count() > MAX_VALUE_WIDTH {
        let head: String = text.chars().take(MAX_VALUE_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        text
    }
}

fn compact_json(value: &forkline_core::Value) -> String {
    truncate(serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_string()))
}

fn compact_op_value(op: &DiffOp) -> String {
    match op {
        DiffOp::Replace { old, new, .. } => {
            format!("{} -> {}", compact_json(old), compact_json(new))
        }
        DiffOp::Add { value, .. } => compact_json(value),
        DiffOp::Remove { old, .. } => compact_json(old),
    }
}

fn push_diff_section(lines: &mut Vec<String>, title: &str, ops: &[DiffOp]) {
    if ops.is_empty() {
        return;
    }
    lines.push(format!("  {title}:"));
    for op in ops.iter().take(MAX_DIFF_OPS_SHOWN) {
        lines.push(format!(
            "    {} {}: {}",
            op.op_name(),
            op.path(),
            compact_op_value(op)
        ));
    }
    if ops.len() > MAX_DIFF_OPS_SHOWN {
        lines.push(format!(
            "    ... and {} more operations",
            ops.len() - MAX_DIFF_OPS_SHOWN
        ));
    }
    lines.push(String::new());
}

fn push_step_section(
    lines: &mut Vec<String>,
    label: &str,
    summary: &forkline_core::StepSummary,
) {
    lines.push(format!("  Run {} step {} '{}':", label, summary.idx, summary.name));
    lines.push(format!("    input_hash:  {}...", &summary.input_hash[..16]));
    lines.push(format!("    output_hash: {}...", &summary.output_hash[..16]));
    lines.push(format!("    events: {}", summary.event_count));
    lines.push(format!("    has_error: {}", summary.has_error));
    lines.push(String::new());
}

fn render_text(result: &DivergenceResult) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("First divergence: {}", result.status));
    lines.push(format!("  {}", result.explanation));
    lines.push(String::new());

    if let Some(summary) = &result.old_step {
        push_step_section(&mut lines, "A", summary);
    }
    if let Some(summary) = &result.new_step {
        push_step_section(&mut lines, "B", summary);
    }
    if let Some(ops) = &result.input_diff {
        push_diff_section(&mut lines, "Input diff", ops);
    }
    if let Some(ops) = &result.output_diff {
        push_diff_section(&mut lines, "Output diff", ops);
    }

    lines.push(format!("  Last equal: step {}", result.last_equal_idx));

    if !result.context_a.is_empty() {
        let ctx: Vec<String> = result
            .context_a
            .iter()
            .map(|s| format!("step {} '{}'", s.idx, s.name))
            .collect();
        lines.push(format!("  Context A: [{}]", ctx.join(", ")));
    }
    if !result.context_b.is_empty() {
        let ctx: Vec<String> = result
            .context_b
            .iter()
            .map(|s| format!("step {} '{}'", s.idx, s.name))
            .collect();
        lines.push(format!("  Context B: [{}]", ctx.join(", ")));
    }

    lines.join("\n")
}
