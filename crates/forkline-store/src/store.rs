//! SQLite-backed append-only run store.
//!
//! Layout: a `runs` row per recording, `steps` rows ordered by `idx`, and
//! append-only `events` rows ordered by rowid within a step. Events are never
//! updated or deleted; a run row transitions `ended_at`/`status` exactly once.
//!
//! Writing goes through [`crate::recorder::RunRecorder`], which redacts every
//! payload before it reaches this layer.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use forkline_core::{ForklineError, Run, RunStatus, Step, Value};

use crate::error::{StoreError, StoreResult};
use crate::storage_traits::{RunListing, RunStore};
use crate::version::{DEFAULT_SCHEMA_VERSION, SCHEMA_VERSION};

/// File-backed (or in-memory) SQLite store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Ephemeral in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                entrypoint TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT,
                env_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS steps (
                step_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );
            CREATE TABLE IF NOT EXISTS events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                step_idx INTEGER NOT NULL,
                type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_steps_run ON steps(run_id, idx);
            CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id, event_id);",
        )?;
        Ok(())
    }

    // -- write path (called by the recorder only) ---------------------------

    pub(crate) fn insert_run(
        &self,
        run_id: &str,
        entrypoint: &str,
        started_at: &str,
        env: &Value,
    ) -> StoreResult<()> {
        let env_json = serde_json::to_string(env)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (run_id, schema_version, entrypoint, started_at, env_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, SCHEMA_VERSION, entrypoint, started_at, env_json],
        )?;
        Ok(())
    }

    pub(crate) fn insert_step(
        &self,
        run_id: &str,
        idx: usize,
        name: &str,
        started_at: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO steps (run_id, idx, name, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, idx as i64, name, started_at],
        )?;
        Ok(())
    }

    pub(crate) fn end_step(&self, run_id: &str, idx: usize, ended_at: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE steps SET ended_at = ?1 WHERE run_id = ?2 AND idx = ?3",
            params![ended_at, run_id, idx as i64],
        )?;
        Ok(())
    }

    pub(crate) fn insert_event(
        &self,
        run_id: &str,
        step_idx: usize,
        event_type: &str,
        payload: &Value,
        created_at: &str,
    ) -> StoreResult<()> {
        let payload_json = serde_json::to_string(payload)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (run_id, step_idx, type, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, step_idx as i64, event_type, payload_json, created_at],
        )?;
        Ok(())
    }

    pub(crate) fn finish_run(
        &self,
        run_id: &str,
        ended_at: &str,
        status: RunStatus,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE runs SET ended_at = ?1, status = ?2
             WHERE run_id = ?3 AND ended_at IS NULL",
            params![ended_at, status.as_str(), run_id],
        )?;
        if updated == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM runs WHERE run_id = ?1",
                    params![run_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            return Err(if exists {
                StoreError::RunEnded(run_id.to_string())
            } else {
                StoreError::RunNotFound(run_id.to_string())
            });
        }
        Ok(())
    }

    // -- read path ----------------------------------------------------------

    fn load_steps(&self, run_id: &str) -> StoreResult<Vec<Step>> {
        let conn = self.conn.lock().unwrap();

        let mut step_stmt =
            conn.prepare("SELECT idx, name FROM steps WHERE run_id = ?1 ORDER BY idx ASC")?;
        let step_rows: Vec<(i64, String)> = step_stmt
            .query_map(params![run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        let mut event_stmt = conn.prepare(
            "SELECT type, payload_json, created_at FROM events
             WHERE run_id = ?1 AND step_idx = ?2 ORDER BY event_id ASC",
        )?;

        let mut steps = Vec::with_capacity(step_rows.len());
        for (idx, name) in step_rows {
            let rows: Vec<(String, String, String)> = event_stmt
                .query_map(params![run_id, idx], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut events = Vec::with_capacity(rows.len());
            for (event_type, payload_json, created_at) in rows {
                let payload: Value = serde_json::from_str(&payload_json).map_err(|e| {
                    ForklineError::CorruptRun {
                        run_id: run_id.to_string(),
                        detail: format!("undecodable event payload at step {idx}: {e}"),
                    }
                })?;
                events.push(forkline_core::Event::new(event_type, payload, created_at));
            }
            steps.push(Step::new(idx as usize, name, events));
        }
        Ok(steps)
    }
}

fn parse_status(run_id: &str, raw: Option<String>) -> StoreResult<RunStatus> {
    match raw.as_deref() {
        None => Ok(RunStatus::Pending),
        Some("success") => Ok(RunStatus::Success),
        Some("failure") => Ok(RunStatus::Failure),
        Some("error") => Ok(RunStatus::Error),
        Some(other) => Err(ForklineError::CorruptRun {
            run_id: run_id.to_string(),
            detail: format!("unknown run status: {other}"),
        }
        .into()),
    }
}

impl RunStore for SqliteStore {
    fn load_run(&self, run_id: &str) -> StoreResult<Run> {
        let header = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT schema_version, status, env_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
        };
        let (schema_version, raw_status, env_json) =
            header.ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        // Artifacts recorded before versioning existed carry no schema tag.
        let schema_version = if schema_version.is_empty() {
            DEFAULT_SCHEMA_VERSION.to_string()
        } else {
            schema_version
        };

        let status = parse_status(run_id, raw_status)?;
        let env_fingerprint: Value =
            serde_json::from_str(&env_json).map_err(|e| ForklineError::CorruptRun {
                run_id: run_id.to_string(),
                detail: format!("undecodable env fingerprint: {e}"),
            })?;
        let steps = self.load_steps(run_id)?;

        let run = Run::new(run_id, schema_version, steps, env_fingerprint, status);
        run.validate()?;
        debug!(event = "store.run_loaded", run_id = %run_id, steps = run.steps.len());
        Ok(run)
    }

    fn list_runs(&self) -> StoreResult<Vec<RunListing>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.run_id, r.entrypoint, r.started_at, r.ended_at, r.status,
                    (SELECT COUNT(*) FROM steps s WHERE s.run_id = r.run_id),
                    (SELECT COUNT(*) FROM events e WHERE e.run_id = r.run_id)
             FROM runs r
             ORDER BY r.started_at ASC, r.run_id ASC",
        )?;
        let rows: Vec<(String, String, String, Option<String>, Option<String>, i64, i64)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        rows.into_iter()
            .map(
                |(run_id, entrypoint, started_at, ended_at, raw_status, steps, events)| {
                    let status = parse_status(&run_id, raw_status)?;
                    Ok(RunListing {
                        run_id,
                        entrypoint,
                        started_at,
                        ended_at,
                        status,
                        step_count: steps as usize,
                        event_count: events as usize,
                    })
                },
            )
            .collect()
    }
}
