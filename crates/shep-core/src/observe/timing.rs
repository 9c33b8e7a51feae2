use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use super::Writer;
use crate::db::{self, Db};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub id: String,
    pub run_id: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

pub trait PhaseTimingStore: Send + Sync {
    fn insert(&self, timing: &PhaseTiming) -> Result<()>;
    fn complete(&self, id: &str, completed_at: DateTime<Utc>, duration_ms: u64) -> Result<()>;
    fn list_for_run(&self, run_id: &str) -> Result<Vec<PhaseTiming>>;
}

// ---------------------------------------------------------------------------
// PhaseTimingRecorder
// ---------------------------------------------------------------------------

/// A phase in progress. Returned by [`PhaseTimingRecorder::start`].
#[derive(Debug)]
pub struct PhaseTimer {
    pub id: String,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    clock: Instant,
}

impl PhaseTimer {
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}

pub struct PhaseTimingRecorder {
    run_id: String,
    store: Option<Arc<dyn PhaseTimingStore>>,
    writer: Writer,
}

impl PhaseTimingRecorder {
    pub(crate) fn new(
        run_id: &str,
        store: Option<Arc<dyn PhaseTimingStore>>,
        writer: Writer,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            store,
            writer,
        }
    }

    pub fn start(&self, phase: &str) -> PhaseTimer {
        let timer = PhaseTimer {
            id: Uuid::new_v4().to_string(),
            phase: phase.to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
        };
        if let Some(store) = self.store.clone() {
            let row = PhaseTiming {
                id: timer.id.clone(),
                run_id: self.run_id.clone(),
                phase: timer.phase.clone(),
                started_at: timer.started_at,
                completed_at: None,
                duration_ms: None,
            };
            self.writer.submit("phase_timing_start", move || store.insert(&row));
        }
        timer
    }

    pub fn end(&self, timer: PhaseTimer) -> Duration {
        let elapsed = timer.elapsed();
        if let Some(store) = self.store.clone() {
            let completed_at = Utc::now();
            let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            self.writer.submit("phase_timing_end", move || {
                store.complete(&timer.id, completed_at, ms)
            });
        }
        elapsed
    }
}

// ---------------------------------------------------------------------------
// SqlitePhaseTimingStore
// ---------------------------------------------------------------------------

pub struct SqlitePhaseTimingStore {
    db: Db,
}

impl SqlitePhaseTimingStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl PhaseTimingStore for SqlitePhaseTimingStore {
    fn insert(&self, timing: &PhaseTiming) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO phase_timings (id, run_id, phase, started_at, completed_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    timing.id,
                    timing.run_id,
                    timing.phase,
                    db::ts(timing.started_at),
                    timing.completed_at.map(db::ts),
                    timing.duration_ms.map(|d| d as i64),
                ],
            )?;
            Ok(())
        })
    }

    fn complete(&self, id: &str, completed_at: DateTime<Utc>, duration_ms: u64) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE phase_timings SET completed_at = ?2, duration_ms = ?3 WHERE id = ?1",
                params![id, db::ts(completed_at), duration_ms as i64],
            )?;
            Ok(())
        })
    }

    fn list_for_run(&self, run_id: &str) -> Result<Vec<PhaseTiming>> {
        type Raw = (String, String, String, String, Option<String>, Option<i64>);
        let rows: Vec<Raw> = self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, phase, started_at, completed_at, duration_ms
                 FROM phase_timings WHERE run_id = ?1 ORDER BY started_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![run_id], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter()
            .map(|(id, run_id, phase, started, completed, duration)| {
                Ok(PhaseTiming {
                    id,
                    run_id,
                    phase,
                    started_at: db::parse_ts(&started)?,
                    completed_at: db::parse_ts_opt(completed)?,
                    duration_ms: duration.map(|d| d.max(0) as u64),
                })
            })
            .collect()
    }
}
