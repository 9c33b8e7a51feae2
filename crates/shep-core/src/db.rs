//! Shared SQLite handle for every durable store.
//!
//! The worker process and the CLI open the same `.shep/shep.db` file
//! concurrently, so the connection runs in WAL mode with a busy timeout.
//! Each store (`checkpoint`, `run`, `feature`, `observe`) borrows the
//! connection through [`Db::with`]. Side-channel writers get their own
//! connection from [`Db::reopen`] so they never queue behind checkpoints.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{Result, ShepError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    /// `None` for in-memory databases.
    path: Option<PathBuf>,
}

impl Db {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        db.migrate()?;
        Ok(db)
    }

    /// A second, independent connection to the same file. An in-memory
    /// database cannot be shared and returns the same handle.
    pub fn reopen(&self) -> Result<Self> {
        match &self.path {
            Some(path) => Self::open(path),
            None => Ok(self.clone()),
        }
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| ShepError::Store("database lock poisoned".into()))?;
        f(&guard)
    }

    fn migrate(&self) -> Result<()> {
        self.with(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS agent_runs (
                    id TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL,
                    feature_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    pid INTEGER,
                    last_heartbeat TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    result TEXT,
                    error TEXT,
                    approval_gates TEXT,
                    push INTEGER NOT NULL DEFAULT 0,
                    open_pr INTEGER NOT NULL DEFAULT 0,
                    repository_path TEXT NOT NULL,
                    spec_dir TEXT NOT NULL,
                    worktree_path TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT PRIMARY KEY,
                    step INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS phase_timings (
                    id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    duration_ms INTEGER
                );

                CREATE TABLE IF NOT EXISTS execution_steps (
                    id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    phase TEXT NOT NULL,
                    sub_step TEXT,
                    event TEXT NOT NULL,
                    detail TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS feature_lifecycle (
                    feature_id TEXT PRIMARY KEY,
                    lifecycle TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_agent_runs_status ON agent_runs(status);
                CREATE INDEX IF NOT EXISTS idx_agent_runs_feature ON agent_runs(feature_id);
                CREATE INDEX IF NOT EXISTS idx_phase_timings_run ON phase_timings(run_id);
                CREATE INDEX IF NOT EXISTS idx_execution_steps_run ON execution_steps(run_id, sequence);
                ",
            )?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers (RFC 3339 text columns)
// ---------------------------------------------------------------------------

pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ShepError::Store(format!("bad timestamp '{value}': {e}")))
}

pub(crate) fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shep.db");
        Db::open(&path).unwrap();
        Db::open(&path).unwrap();
    }

    #[test]
    fn two_handles_see_each_others_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shep.db");
        let a = Db::open(&path).unwrap();
        let b = Db::open(&path).unwrap();

        a.with(|c| {
            c.execute(
                "INSERT INTO feature_lifecycle (feature_id, lifecycle, updated_at) VALUES ('f', 'review', 'now')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let lifecycle: String = b
            .with(|c| {
                Ok(c.query_row(
                    "SELECT lifecycle FROM feature_lifecycle WHERE feature_id = 'f'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(lifecycle, "review");
    }

    #[test]
    fn reopened_handle_does_not_share_the_lock() {
        let dir = TempDir::new().unwrap();
        let main = Db::open(&dir.path().join("shep.db")).unwrap();
        let side = main.reopen().unwrap();
        assert!(!Arc::ptr_eq(&main.conn, &side.conn));

        // Writing through `side` while `main` is held must not deadlock.
        main.with(|_| {
            side.with(|c| {
                c.execute(
                    "INSERT INTO feature_lifecycle (feature_id, lifecycle, updated_at) VALUES ('f', 'plan', 'now')",
                    [],
                )?;
                Ok(())
            })
        })
        .unwrap();

        let n: i64 = main
            .with(|c| Ok(c.query_row("SELECT COUNT(*) FROM feature_lifecycle", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn in_memory_reopen_shares_the_connection() {
        let db = Db::open_in_memory().unwrap();
        assert!(Arc::ptr_eq(&db.conn, &db.reopen().unwrap().conn));
    }

    #[test]
    fn timestamps_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&ts(now)).unwrap();
        assert_eq!(parsed, now);
    }
}
