//! Durable snapshots of graph progress, keyed by thread id.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::error::Result;
use crate::workflow::{Node, WorkflowState};

/// A pending human decision: the graph stopped inside `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interrupt {
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub state: WorkflowState,
    /// Node to run next; `None` once the graph has ended.
    pub next: Option<Node>,
    #[serde(default)]
    pub interrupt: Option<Interrupt>,
    /// Number of nodes completed on this thread.
    pub step: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_finished(&self) -> bool {
        self.next.is_none() && self.interrupt.is_none()
    }
}

pub trait CheckpointStore: Send + Sync {
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>>;
    fn put(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn delete(&self, thread_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SqliteCheckpointStore
// ---------------------------------------------------------------------------

/// One row per thread; each put replaces the previous snapshot.
pub struct SqliteCheckpointStore {
    db: Db,
}

impl SqliteCheckpointStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let payload: Option<String> = self.db.with(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |r| r.get(0),
                )
                .optional()?)
        })?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(Into::into))
            .transpose()
    }

    fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = serde_json::to_string(checkpoint)?;
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (thread_id, step, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(thread_id) DO UPDATE
                 SET step = excluded.step, payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![
                    checkpoint.thread_id,
                    checkpoint.step as i64,
                    payload,
                    crate::db::ts(checkpoint.updated_at)
                ],
            )?;
            Ok(())
        })
    }

    fn delete(&self, thread_id: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(thread: &str, step: u64) -> Checkpoint {
        let mut state = WorkflowState::new("auth", "/repo", "/repo/specs/auth");
        state.messages.push("[analyze] done".into());
        Checkpoint {
            thread_id: thread.into(),
            state,
            next: Some(Node::Requirements),
            interrupt: None,
            step,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn get_missing_is_none() {
        let store = SqliteCheckpointStore::new(Db::open_in_memory().unwrap());
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn put_replaces_previous_snapshot() {
        let store = SqliteCheckpointStore::new(Db::open_in_memory().unwrap());
        store.put(&sample("t1", 1)).unwrap();

        let mut second = sample("t1", 2);
        second.interrupt = Some(Interrupt {
            node: Node::Requirements,
        });
        store.put(&second).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got, second);
    }

    #[test]
    fn delete_removes_thread() {
        let store = SqliteCheckpointStore::new(Db::open_in_memory().unwrap());
        store.put(&sample("t1", 1)).unwrap();
        store.delete("t1").unwrap();
        assert!(store.get("t1").unwrap().is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shep.db");
        SqliteCheckpointStore::new(Db::open(&path).unwrap())
            .put(&sample("t1", 3))
            .unwrap();

        let reopened = SqliteCheckpointStore::new(Db::open(&path).unwrap());
        let got = reopened.get("t1").unwrap().unwrap();
        assert_eq!(got.step, 3);
        assert_eq!(got.state.messages, vec!["[analyze] done".to_string()]);
    }

    #[test]
    fn finished_means_no_next_and_no_interrupt() {
        let mut cp = sample("t", 6);
        assert!(!cp.is_finished());
        cp.next = None;
        assert!(cp.is_finished());
    }
}
