use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::Writer;
use crate::db::{self, Db};
use crate::error::{Result, ShepError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    Started,
    Completed,
    Failed,
    Interrupted,
    Info,
}

impl StepEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            StepEvent::Started => "started",
            StepEvent::Completed => "completed",
            StepEvent::Failed => "failed",
            StepEvent::Interrupted => "interrupted",
            StepEvent::Info => "info",
        }
    }
}

impl fmt::Display for StepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepEvent {
    type Err = ShepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(StepEvent::Started),
            "completed" => Ok(StepEvent::Completed),
            "failed" => Ok(StepEvent::Failed),
            "interrupted" => Ok(StepEvent::Interrupted),
            "info" => Ok(StepEvent::Info),
            other => Err(ShepError::Store(format!("unknown step event '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    pub id: String,
    pub run_id: String,
    pub sequence: u64,
    pub phase: String,
    pub sub_step: Option<String>,
    pub event: StepEvent,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub trait ExecutionStepStore: Send + Sync {
    fn append(&self, step: &ExecutionStep) -> Result<()>;
    /// Highest sequence recorded for the run, 0 when none.
    fn max_sequence(&self, run_id: &str) -> Result<u64>;
    fn list_for_run(&self, run_id: &str) -> Result<Vec<ExecutionStep>>;
}

// ---------------------------------------------------------------------------
// ExecutionStepMonitor
// ---------------------------------------------------------------------------

/// Sequence-numbered event log for one run. Sequences continue across
/// worker restarts of the same run.
pub struct ExecutionStepMonitor {
    run_id: String,
    store: Option<Arc<dyn ExecutionStepStore>>,
    writer: Writer,
    sequence: AtomicU64,
}

impl ExecutionStepMonitor {
    pub(crate) fn new(
        run_id: &str,
        store: Option<Arc<dyn ExecutionStepStore>>,
        writer: Writer,
    ) -> Self {
        let start = match &store {
            Some(s) => s.max_sequence(run_id).unwrap_or_else(|e| {
                warn!(run_id, error = %e, "could not read step sequence; starting at 0");
                0
            }),
            None => 0,
        };
        Self {
            run_id: run_id.to_string(),
            store,
            writer,
            sequence: AtomicU64::new(start),
        }
    }

    /// Queue one step and return its sequence number.
    pub fn record(
        &self,
        phase: &str,
        sub_step: Option<&str>,
        event: StepEvent,
        detail: Option<String>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(store) = self.store.clone() {
            let step = ExecutionStep {
                id: Uuid::new_v4().to_string(),
                run_id: self.run_id.clone(),
                sequence,
                phase: phase.to_string(),
                sub_step: sub_step.map(str::to_string),
                event,
                detail,
                created_at: Utc::now(),
            };
            self.writer.submit("execution_step", move || store.append(&step));
        }
        sequence
    }
}

// ---------------------------------------------------------------------------
// SqliteExecutionStepStore
// ---------------------------------------------------------------------------

pub struct SqliteExecutionStepStore {
    db: Db,
}

impl SqliteExecutionStepStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl ExecutionStepStore for SqliteExecutionStepStore {
    fn append(&self, step: &ExecutionStep) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO execution_steps
                 (id, run_id, sequence, phase, sub_step, event, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    step.id,
                    step.run_id,
                    step.sequence as i64,
                    step.phase,
                    step.sub_step,
                    step.event.as_str(),
                    step.detail,
                    db::ts(step.created_at),
                ],
            )?;
            Ok(())
        })
    }

    fn max_sequence(&self, run_id: &str) -> Result<u64> {
        let max: Option<i64> = self.db.with(|conn| {
            Ok(conn.query_row(
                "SELECT MAX(sequence) FROM execution_steps WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )?)
        })?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    fn list_for_run(&self, run_id: &str) -> Result<Vec<ExecutionStep>> {
        let rows = self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, sequence, phase, sub_step, event, detail, created_at
                 FROM execution_steps WHERE run_id = ?1 ORDER BY sequence",
            )?;
            let rows = stmt
                .query_map(params![run_id], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, String>(7)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter()
            .map(|(id, run_id, seq, phase, sub_step, event, detail, created)| {
                Ok(ExecutionStep {
                    id,
                    run_id,
                    sequence: seq.max(0) as u64,
                    phase,
                    sub_step,
                    event: event.parse()?,
                    detail,
                    created_at: db::parse_ts(&created)?,
                })
            })
            .collect()
    }
}
