//! Checkpointed graph state and its per-field reducer.
//!
//! Every field of [`WorkflowState`] is merged by exactly one rule:
//!
//! | rule    | fields                                                        |
//! |---------|---------------------------------------------------------------|
//! | fixed   | `feature_id`, `repository_path`, `spec_dir`, `worktree_path`, |
//! |         | `approval_gates`, `push`, `open_pr` (set at invocation)       |
//! | append  | `messages`, `ci_fix_history`                                  |
//! | replace | everything else                                               |
//!
//! Nodes never mutate the state directly; they return a [`StateUpdate`]
//! which the graph folds in with [`WorkflowState::reduce`] after the node
//! returns successfully.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::Gate;

// ---------------------------------------------------------------------------
// ApprovalGates
// ---------------------------------------------------------------------------

/// `true` means "do not pause after this phase".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGates {
    #[serde(default)]
    pub allow_prd: bool,
    #[serde(default)]
    pub allow_plan: bool,
    #[serde(default)]
    pub allow_merge: bool,
}

impl ApprovalGates {
    pub fn allows(&self, gate: Gate) -> bool {
        match gate {
            Gate::Prd => self.allow_prd,
            Gate::Plan => self.allow_plan,
            Gate::Merge => self.allow_merge,
        }
    }
}

// ---------------------------------------------------------------------------
// CI fix types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiFixStatus {
    #[default]
    Idle,
    Watching,
    Fixing,
    Success,
    Exhausted,
    Timeout,
}

impl CiFixStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CiFixStatus::Idle => "idle",
            CiFixStatus::Watching => "watching",
            CiFixStatus::Fixing => "fixing",
            CiFixStatus::Success => "success",
            CiFixStatus::Exhausted => "exhausted",
            CiFixStatus::Timeout => "timeout",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            CiFixStatus::Success | CiFixStatus::Exhausted | CiFixStatus::Timeout
        )
    }
}

impl fmt::Display for CiFixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiFixOutcome {
    Failed,
    Fixed,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiFixRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub failure_summary: String,
    pub outcome: CiFixOutcome,
}

/// A fix that has been pushed but whose CI result has not been observed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCiFix {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub failure_summary: String,
}

impl PendingCiFix {
    pub fn resolve(self, outcome: CiFixOutcome) -> CiFixRecord {
        CiFixRecord {
            attempt: self.attempt,
            started_at: self.started_at,
            failure_summary: self.failure_summary,
            outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub feature_id: String,
    pub repository_path: PathBuf,
    pub spec_dir: PathBuf,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,

    #[serde(default)]
    pub current_node: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,

    #[serde(default)]
    pub approval_gates: Option<ApprovalGates>,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub open_pr: bool,

    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub ci_status: Option<String>,

    #[serde(default)]
    pub ci_fix_attempts: u32,
    #[serde(default)]
    pub ci_fix_history: Vec<CiFixRecord>,
    #[serde(default)]
    pub ci_fix_status: CiFixStatus,
    #[serde(default)]
    pub ci_fix_pending: Option<PendingCiFix>,

    #[serde(default)]
    pub approval_action: Option<ApprovalAction>,
    #[serde(default)]
    pub rejection_feedback: Option<String>,
    #[serde(default)]
    pub needs_reexecution: bool,
    #[serde(default)]
    pub rejection_iteration: u32,
}

impl WorkflowState {
    pub fn new(
        feature_id: impl Into<String>,
        repository_path: impl Into<PathBuf>,
        spec_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            repository_path: repository_path.into(),
            spec_dir: spec_dir.into(),
            worktree_path: None,
            current_node: None,
            error: None,
            messages: Vec::new(),
            approval_gates: None,
            push: false,
            open_pr: false,
            pr_url: None,
            pr_number: None,
            commit_hash: None,
            ci_status: None,
            ci_fix_attempts: 0,
            ci_fix_history: Vec::new(),
            ci_fix_status: CiFixStatus::Idle,
            ci_fix_pending: None,
            approval_action: None,
            rejection_feedback: None,
            needs_reexecution: false,
            rejection_iteration: 0,
        }
    }

    pub fn with_worktree(mut self, worktree: Option<PathBuf>) -> Self {
        self.worktree_path = worktree;
        self
    }

    pub fn with_gates(mut self, gates: Option<ApprovalGates>) -> Self {
        self.approval_gates = gates;
        self
    }

    pub fn with_merge_options(mut self, push: bool, open_pr: bool) -> Self {
        self.push = push;
        self.open_pr = open_pr;
        self
    }

    /// Directory the agent works in: the worktree when one exists.
    pub fn work_dir(&self) -> &Path {
        self.worktree_path
            .as_deref()
            .unwrap_or(self.repository_path.as_path())
    }

    /// A closed gate pauses the graph after its phase. With no gate map at
    /// all the run is fully automatic.
    pub fn gate_closed(&self, gate: Gate) -> bool {
        self.approval_gates.is_some_and(|g| !g.allows(gate))
    }

    pub fn pushes_branch(&self) -> bool {
        self.push || self.open_pr
    }

    /// Fold a node's partial update into the state.
    pub fn reduce(mut self, update: StateUpdate) -> Self {
        self.apply(update);
        self
    }

    pub fn apply(&mut self, update: StateUpdate) {
        replace(&mut self.current_node, update.current_node.map(Some));
        replace(&mut self.error, update.error);
        append(&mut self.messages, update.messages);

        replace(&mut self.pr_url, update.pr_url);
        replace(&mut self.pr_number, update.pr_number);
        replace(&mut self.commit_hash, update.commit_hash);
        replace(&mut self.ci_status, update.ci_status);

        replace(&mut self.ci_fix_attempts, update.ci_fix_attempts);
        append(&mut self.ci_fix_history, update.ci_fix_history);
        replace(&mut self.ci_fix_status, update.ci_fix_status);
        replace(&mut self.ci_fix_pending, update.ci_fix_pending);

        replace(&mut self.approval_action, update.approval_action);
        replace(&mut self.rejection_feedback, update.rejection_feedback);
        replace(&mut self.needs_reexecution, update.needs_reexecution);
        replace(&mut self.rejection_iteration, update.rejection_iteration);
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn append<T>(list: &mut Vec<T>, mut items: Vec<T>) {
    list.append(&mut items);
}

// ---------------------------------------------------------------------------
// StateUpdate
// ---------------------------------------------------------------------------

/// Partial state returned by a node. `None` leaves a replace-field alone;
/// `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub current_node: Option<String>,
    pub error: Option<Option<String>>,
    pub messages: Vec<String>,

    pub pr_url: Option<Option<String>>,
    pub pr_number: Option<Option<u64>>,
    pub commit_hash: Option<Option<String>>,
    pub ci_status: Option<Option<String>>,

    pub ci_fix_attempts: Option<u32>,
    pub ci_fix_history: Vec<CiFixRecord>,
    pub ci_fix_status: Option<CiFixStatus>,
    pub ci_fix_pending: Option<Option<PendingCiFix>>,

    pub approval_action: Option<Option<ApprovalAction>>,
    pub rejection_feedback: Option<Option<String>>,
    pub needs_reexecution: Option<bool>,
    pub rejection_iteration: Option<u32>,
}

impl StateUpdate {
    /// Update for a node that finished: records the node, clears the last
    /// error and appends one progress message.
    pub fn completed(node: &str, summary: &str) -> Self {
        Self {
            current_node: Some(node.to_string()),
            error: Some(None),
            messages: vec![format!("[{node}] {summary}")],
            ..Default::default()
        }
    }

    /// Drop the human decision carried in from a resume.
    pub fn clear_decision(mut self) -> Self {
        self.approval_action = Some(None);
        self.rejection_feedback = Some(None);
        self.needs_reexecution = Some(false);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
