//! Record two slightly different runs and print their first divergence.
//!
//! ```sh
//! cargo run --example record_and_diff
//! ```

use std::sync::Arc;

use serde_json::json;

use forkline_core::{find_first_divergence, DivergenceConfig, RunStatus, Value};
use forkline_store::{RunRecorder, RunStore, SqliteStore};

fn record_pipeline(
    store: Arc<SqliteStore>,
    response: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut recorder = RunRecorder::start(store, "examples/record_and_diff.rs")?;
    let run_id = recorder.run_id().to_string();

    recorder.with_step("init", |rec| {
        rec.log_event("input", &Value::from(json!({"prompt": "summarize the report"})))?;
        rec.log_event("output", &Value::from(json!({"ready": true})))
    })?;

    recorder.with_step("retrieve", |rec| {
        rec.log_event("input", &Value::from(json!({"query": "quarterly report"})))?;
        rec.log_event(
            "tool_call",
            &Value::from(json!({"tool": "search", "api_key": "sk-demo-123"})),
        )?;
        rec.log_event("output", &Value::from(json!({"documents": 3})))
    })?;

    recorder.with_step("generate_response", |rec| {
        rec.log_event("input", &Value::from(json!({"q": "hi"})))?;
        rec.log_event("output", &Value::from(json!({"text": response})))
    })?;

    recorder.end_run(RunStatus::Success)?;
    Ok(run_id)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqliteStore::open(dir.path().join("forkline.db"))?);

    let id_a = record_pipeline(Arc::clone(&store), "Revenue grew 12% quarter over quarter.")?;
    let id_b = record_pipeline(Arc::clone(&store), "Revenue declined 3% quarter over quarter.")?;

    let run_a = store.load_run(&id_a)?;
    let run_b = store.load_run(&id_b)?;

    // The tool_call's api_key never reached disk.
    let tool_call = &run_a.steps[1].events[1].payload;
    println!("persisted tool_call payload: {}", serde_json::to_string(tool_call)?);

    let result = find_first_divergence(&run_a, &run_b, &DivergenceConfig::default())?;
    println!("status:      {}", result.status);
    println!("explanation: {}", result.explanation);
    if let Some(diff) = &result.output_diff {
        for op in diff {
            println!("  {} {}", op.op_name(), op.path());
        }
    }
    Ok(())
}
