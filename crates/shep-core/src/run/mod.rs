//! Agent run records: one row per feature run, tracking the worker process
//! that drives its graph thread.

mod health;
mod service;
mod store;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ShepError;
use crate::workflow::{ApprovalGates, WorkflowState};

pub use health::{RunHealth, RunHealthThresholds};
pub use service::{RunService, SubmitOutcome};
pub use store::{RunRepository, SqliteRunRepository};

// ---------------------------------------------------------------------------
// AgentRunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Interrupted,
}

impl AgentRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRunStatus::Pending => "pending",
            AgentRunStatus::Running => "running",
            AgentRunStatus::WaitingApproval => "waiting_approval",
            AgentRunStatus::Completed => "completed",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::Interrupted => "interrupted",
        }
    }

    /// A worker process is expected to be alive.
    pub fn is_active(self) -> bool {
        matches!(self, AgentRunStatus::Pending | AgentRunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentRunStatus::Completed | AgentRunStatus::Failed | AgentRunStatus::Interrupted
        )
    }
}

impl fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRunStatus {
    type Err = ShepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AgentRunStatus::Pending),
            "running" => Ok(AgentRunStatus::Running),
            "waiting_approval" => Ok(AgentRunStatus::WaitingApproval),
            "completed" => Ok(AgentRunStatus::Completed),
            "failed" => Ok(AgentRunStatus::Failed),
            "interrupted" => Ok(AgentRunStatus::Interrupted),
            other => Err(ShepError::Store(format!("unknown run status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RunRequest / AgentRunRecord
// ---------------------------------------------------------------------------

/// Parameters of a new feature run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub feature_id: String,
    pub repository_path: PathBuf,
    pub spec_dir: PathBuf,
    pub worktree_path: Option<PathBuf>,
    pub approval_gates: Option<ApprovalGates>,
    pub push: bool,
    pub open_pr: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub id: String,
    pub thread_id: String,
    pub feature_id: String,
    pub status: AgentRunStatus,
    pub pid: Option<u32>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub approval_gates: Option<ApprovalGates>,
    pub push: bool,
    pub open_pr: bool,
    pub repository_path: PathBuf,
    pub spec_dir: PathBuf,
    pub worktree_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRunRecord {
    /// A fresh `pending` record with new run and thread ids.
    pub fn pending(request: RunRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: Uuid::new_v4().to_string(),
            feature_id: request.feature_id,
            status: AgentRunStatus::Pending,
            pid: None,
            last_heartbeat: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            approval_gates: request.approval_gates,
            push: request.push,
            open_pr: request.open_pr,
            repository_path: request.repository_path,
            spec_dir: request.spec_dir,
            worktree_path: request.worktree_path,
            created_at: now,
            updated_at: now,
        }
    }

    /// The state a fresh graph thread starts from.
    pub fn initial_state(&self) -> WorkflowState {
        WorkflowState::new(&self.feature_id, &self.repository_path, &self.spec_dir)
            .with_worktree(self.worktree_path.clone())
            .with_gates(self.approval_gates)
            .with_merge_options(self.push, self.open_pr)
    }

    /// Last node the worker reported through its heartbeat.
    pub fn last_node(&self) -> Option<&str> {
        self.result.as_deref()?.strip_prefix("node:")
    }

    /// Node the run is paused at, from an `interrupt:<node>` result.
    pub fn waiting_at(&self) -> Option<&str> {
        self.result.as_deref()?.strip_prefix("interrupt:")
    }
}
