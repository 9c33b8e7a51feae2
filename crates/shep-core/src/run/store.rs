use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{AgentRunRecord, AgentRunStatus};
use crate::db::{self, Db};
use crate::error::{Result, ShepError};
use crate::workflow::ApprovalGates;

/// Persistence for [`AgentRunRecord`]s.
///
/// Status transitions that race with another process (`mark_running_if`,
/// `mark_interrupted_if_active`) are conditional single-statement updates
/// and report whether they changed a row.
pub trait RunRepository: Send + Sync {
    fn create(&self, record: &AgentRunRecord) -> Result<()>;
    fn find_by_id(&self, id: &str) -> Result<Option<AgentRunRecord>>;
    /// Newest first.
    fn list(&self) -> Result<Vec<AgentRunRecord>>;
    /// Runs whose worker should be alive (`pending` or `running`).
    fn list_active(&self) -> Result<Vec<AgentRunRecord>>;

    fn mark_running(&self, id: &str, pid: u32) -> Result<()>;
    fn mark_running_if(&self, id: &str, pid: u32, expected: AgentRunStatus) -> Result<bool>;
    fn update_status(
        &self,
        id: &str,
        status: AgentRunStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()>;
    fn mark_interrupted_if_active(&self, id: &str, error: &str) -> Result<bool>;
    fn update_heartbeat(&self, id: &str, result: &str, at: DateTime<Utc>) -> Result<()>;
}

pub struct SqliteRunRepository {
    db: Db,
}

impl SqliteRunRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn require_row(id: &str, changed: usize) -> Result<()> {
        if changed == 0 {
            return Err(ShepError::RunNotFound(id.to_string()));
        }
        Ok(())
    }
}

const COLUMNS: &str = "id, thread_id, feature_id, status, pid, last_heartbeat, started_at,
    completed_at, result, error, approval_gates, push, open_pr, repository_path, spec_dir,
    worktree_path, created_at, updated_at";

struct RawRow {
    id: String,
    thread_id: String,
    feature_id: String,
    status: String,
    pid: Option<i64>,
    last_heartbeat: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    result: Option<String>,
    error: Option<String>,
    approval_gates: Option<String>,
    push: bool,
    open_pr: bool,
    repository_path: String,
    spec_dir: String,
    worktree_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            thread_id: r.get(1)?,
            feature_id: r.get(2)?,
            status: r.get(3)?,
            pid: r.get(4)?,
            last_heartbeat: r.get(5)?,
            started_at: r.get(6)?,
            completed_at: r.get(7)?,
            result: r.get(8)?,
            error: r.get(9)?,
            approval_gates: r.get(10)?,
            push: r.get(11)?,
            open_pr: r.get(12)?,
            repository_path: r.get(13)?,
            spec_dir: r.get(14)?,
            worktree_path: r.get(15)?,
            created_at: r.get(16)?,
            updated_at: r.get(17)?,
        })
    }

    fn into_record(self) -> Result<AgentRunRecord> {
        Ok(AgentRunRecord {
            id: self.id,
            thread_id: self.thread_id,
            feature_id: self.feature_id,
            status: self.status.parse()?,
            pid: self.pid.and_then(|p| u32::try_from(p).ok()),
            last_heartbeat: db::parse_ts_opt(self.last_heartbeat)?,
            started_at: db::parse_ts_opt(self.started_at)?,
            completed_at: db::parse_ts_opt(self.completed_at)?,
            result: self.result,
            error: self.error,
            approval_gates: self
                .approval_gates
                .as_deref()
                .map(serde_json::from_str::<ApprovalGates>)
                .transpose()?,
            push: self.push,
            open_pr: self.open_pr,
            repository_path: PathBuf::from(self.repository_path),
            spec_dir: PathBuf::from(self.spec_dir),
            worktree_path: self.worktree_path.map(PathBuf::from),
            created_at: db::parse_ts(&self.created_at)?,
            updated_at: db::parse_ts(&self.updated_at)?,
        })
    }
}

fn path_text(p: &std::path::Path) -> String {
    p.to_string_lossy().into_owned()
}

impl RunRepository for SqliteRunRepository {
    fn create(&self, record: &AgentRunRecord) -> Result<()> {
        let gates = record
            .approval_gates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.db.with(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO agent_runs ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18)"
                ),
                params![
                    record.id,
                    record.thread_id,
                    record.feature_id,
                    record.status.as_str(),
                    record.pid.map(i64::from),
                    record.last_heartbeat.map(db::ts),
                    record.started_at.map(db::ts),
                    record.completed_at.map(db::ts),
                    record.result,
                    record.error,
                    gates,
                    record.push,
                    record.open_pr,
                    path_text(&record.repository_path),
                    path_text(&record.spec_dir),
                    record.worktree_path.as_deref().map(path_text),
                    db::ts(record.created_at),
                    db::ts(record.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn find_by_id(&self, id: &str) -> Result<Option<AgentRunRecord>> {
        let raw = self.db.with(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM agent_runs WHERE id = ?1"),
                    params![id],
                    RawRow::read,
                )
                .optional()?)
        })?;
        raw.map(RawRow::into_record).transpose()
    }

    fn list(&self) -> Result<Vec<AgentRunRecord>> {
        let rows = self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM agent_runs ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt
                .query_map([], RawRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    fn list_active(&self) -> Result<Vec<AgentRunRecord>> {
        let rows = self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM agent_runs
                 WHERE status IN ('pending', 'running')
                 ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt
                .query_map([], RawRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    fn mark_running(&self, id: &str, pid: u32) -> Result<()> {
        let now = db::ts(Utc::now());
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE agent_runs
                 SET status = 'running', pid = ?2, started_at = COALESCE(started_at, ?3),
                     completed_at = NULL, error = NULL, last_heartbeat = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, i64::from(pid), now],
            )?)
        })?;
        Self::require_row(id, changed)
    }

    fn mark_running_if(&self, id: &str, pid: u32, expected: AgentRunStatus) -> Result<bool> {
        let now = db::ts(Utc::now());
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE agent_runs
                 SET status = 'running', pid = ?2, started_at = COALESCE(started_at, ?3),
                     completed_at = NULL, error = NULL, last_heartbeat = ?3, updated_at = ?3
                 WHERE id = ?1 AND status = ?4",
                params![id, i64::from(pid), now, expected.as_str()],
            )?)
        })?;
        Ok(changed > 0)
    }

    fn update_status(
        &self,
        id: &str,
        status: AgentRunStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = db::ts(Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE agent_runs
                 SET status = ?2, result = COALESCE(?3, result), error = ?4,
                     completed_at = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![id, status.as_str(), result, error, completed_at, now],
            )?)
        })?;
        Self::require_row(id, changed)
    }

    fn mark_interrupted_if_active(&self, id: &str, error: &str) -> Result<bool> {
        let now = db::ts(Utc::now());
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE agent_runs
                 SET status = 'interrupted', error = ?2, completed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![id, error, now],
            )?)
        })?;
        Ok(changed > 0)
    }

    fn update_heartbeat(&self, id: &str, result: &str, at: DateTime<Utc>) -> Result<()> {
        let at = db::ts(at);
        self.db.with(|conn| {
            conn.execute(
                "UPDATE agent_runs SET result = ?2, last_heartbeat = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, result, at],
            )?;
            Ok(())
        })
    }
}
