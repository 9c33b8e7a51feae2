use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::node::Node;
use super::prompts;
use super::resume::{Decision, GraphCommand, ResumePayload};
use super::state::{ApprovalAction, StateUpdate, WorkflowState};
use crate::checkpoint::{Checkpoint, CheckpointStore, Interrupt};
use crate::config::Config;
use crate::error::{Result, ShepError};
use crate::executor::{ExecuteOptions, ExecuteResult, ExecutorPort};
use crate::feature::Lifecycle;
use crate::git::GitPrPort;
use crate::observe::{RunContext, StepEvent};

// ---------------------------------------------------------------------------
// GraphSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub executor_timeout: Option<Duration>,
    pub base_branch: String,
    pub branch_prefix: String,
    pub ci_enabled: bool,
    pub ci_max_attempts: u32,
    pub ci_watch_timeout: Duration,
    pub ci_poll_interval: Duration,
}

impl From<&Config> for GraphSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            model: Some(cfg.executor.model.clone()),
            max_turns: Some(cfg.executor.max_turns),
            executor_timeout: cfg.executor.timeout(),
            base_branch: cfg.git.base_branch.clone(),
            branch_prefix: cfg.git.branch_prefix.clone(),
            ci_enabled: cfg.ci.enabled,
            ci_max_attempts: cfg.ci.max_attempts,
            ci_watch_timeout: cfg.ci.watch_timeout(),
            ci_poll_interval: cfg.ci.poll_interval(),
        }
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl GraphSettings {
    pub fn feature_branch(&self, feature_id: &str) -> String {
        format!("{}{}", self.branch_prefix, feature_id)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GraphOutcome {
    /// The graph reached its end.
    Completed(WorkflowState),
    /// A gate is waiting for a human decision at `node`.
    Interrupted { node: Node, state: WorkflowState },
}

impl GraphOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            GraphOutcome::Completed(state) => state,
            GraphOutcome::Interrupted { state, .. } => state,
        }
    }
}

pub(super) enum NodeOutcome {
    Complete {
        update: StateUpdate,
        next: Option<Node>,
    },
    /// Wait at the node's gate. Only the decision bookkeeping in `update`
    /// survives; the node's own writes are discarded.
    Interrupt(StateUpdate),
}

pub(super) enum GateCheck {
    Pass,
    Interrupt,
    Rejected { feedback: String, iteration: u32 },
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

pub struct WorkflowGraph {
    pub(super) executor: Arc<dyn ExecutorPort>,
    pub(super) git: Arc<dyn GitPrPort>,
    checkpoints: Arc<dyn CheckpointStore>,
    pub(super) settings: GraphSettings,
}

impl WorkflowGraph {
    pub fn new(
        executor: Arc<dyn ExecutorPort>,
        git: Arc<dyn GitPrPort>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: GraphSettings,
    ) -> Self {
        Self {
            executor,
            git,
            checkpoints,
            settings,
        }
    }

    pub fn checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.checkpoints.get(thread_id)
    }

    /// Run `thread_id` until it ends, is interrupted at a gate, or a node
    /// fails. A failed node leaves the previous checkpoint in place.
    pub async fn invoke(
        &self,
        thread_id: &str,
        command: GraphCommand,
        ctx: &RunContext,
    ) -> Result<GraphOutcome> {
        let existing = self.checkpoints.get(thread_id)?;
        let (mut cp, mut resume) = match (command, existing) {
            (GraphCommand::Start(state), None) => {
                ctx.record_lifecycle(&state.feature_id, Lifecycle::Started);
                let cp = Checkpoint {
                    thread_id: thread_id.to_string(),
                    state,
                    next: Some(Node::first()),
                    interrupt: None,
                    step: 0,
                    updated_at: Utc::now(),
                };
                (cp, None)
            }
            (GraphCommand::Start(_), Some(cp)) | (GraphCommand::Continue, Some(cp)) => {
                debug!(thread_id, step = cp.step, "continuing from checkpoint");
                (cp, None)
            }
            (GraphCommand::Resume(payload), Some(cp)) => {
                if cp.interrupt.is_none() {
                    return Err(ShepError::NoPendingInterrupt(thread_id.to_string()));
                }
                payload.decision()?;
                (cp, Some(payload))
            }
            (GraphCommand::Continue, None) | (GraphCommand::Resume(_), None) => {
                return Err(ShepError::NoCheckpoint(thread_id.to_string()));
            }
        };

        if let (Some(interrupt), None) = (cp.interrupt, resume.as_ref()) {
            debug!(thread_id, node = %interrupt.node, "interrupt still pending");
            return Ok(GraphOutcome::Interrupted {
                node: interrupt.node,
                state: cp.state,
            });
        }

        loop {
            let Some(node) = cp.next else {
                info!(thread_id, steps = cp.step, "graph completed");
                return Ok(GraphOutcome::Completed(cp.state));
            };
            let payload = resume.take();

            info!(thread_id, node = %node, "node start");
            ctx.heartbeat.report_node_start(node);
            if Node::PHASES.contains(&node) {
                ctx.record_lifecycle(&cp.state.feature_id, node.lifecycle());
            }
            ctx.steps.record(node.as_str(), None, StepEvent::Started, None);
            let timer = ctx.timings.start(node.as_str());

            let outcome = self.run_node(node, &cp.state, payload.as_ref(), ctx).await;
            let elapsed = ctx.timings.end(timer);

            match outcome {
                Err(e) => {
                    warn!(thread_id, node = %node, error = %e, "node failed");
                    ctx.steps
                        .record(node.as_str(), None, StepEvent::Failed, Some(e.to_string()));
                    return Err(e);
                }
                Ok(NodeOutcome::Interrupt(update)) => {
                    info!(thread_id, node = %node, "waiting for approval");
                    ctx.steps
                        .record(node.as_str(), None, StepEvent::Interrupted, None);
                    cp.state.apply(update);
                    cp.interrupt = Some(Interrupt { node });
                    cp.next = Some(node);
                    cp.updated_at = Utc::now();
                    self.checkpoints.put(&cp)?;
                    return Ok(GraphOutcome::Interrupted {
                        node,
                        state: cp.state,
                    });
                }
                Ok(NodeOutcome::Complete { update, next }) => {
                    debug!(
                        thread_id,
                        node = %node,
                        next = ?next,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "node complete"
                    );
                    ctx.steps
                        .record(node.as_str(), None, StepEvent::Completed, None);
                    cp.state.apply(update);
                    cp.next = next;
                    cp.interrupt = None;
                    cp.step += 1;
                    cp.updated_at = Utc::now();
                    self.checkpoints.put(&cp)?;
                }
            }
        }
    }

    async fn run_node(
        &self,
        node: Node,
        state: &WorkflowState,
        payload: Option<&ResumePayload>,
        ctx: &RunContext,
    ) -> Result<NodeOutcome> {
        match node {
            Node::Merge => self.run_merge(state, payload, ctx).await,
            Node::CiFix => self.run_ci_fix(state, ctx).await,
            phase => self.run_phase(phase, state, payload, ctx).await,
        }
    }

    async fn run_phase(
        &self,
        node: Node,
        state: &WorkflowState,
        payload: Option<&ResumePayload>,
        ctx: &RunContext,
    ) -> Result<NodeOutcome> {
        let gate = check_gate(node, state, payload)?;
        let state = decided_state(state, &gate);
        let prompt = prompts::phase_prompt(node, &state);
        let result = self.execute(node, &prompt, &state, ctx).await?;

        match gate {
            GateCheck::Interrupt => Ok(NodeOutcome::Interrupt(StateUpdate::default())),
            GateCheck::Rejected {
                feedback,
                iteration,
            } => Ok(NodeOutcome::Interrupt(rejection_update(feedback, iteration))),
            GateCheck::Pass => Ok(NodeOutcome::Complete {
                update: StateUpdate::completed(node.as_str(), &summarize(&result.result))
                    .clear_decision(),
                next: self.route_after(node, &state, ctx),
            }),
        }
    }

    /// Successor of a completed phase. Without approval gates the workflow
    /// ends after implement and merge never starts.
    fn route_after(&self, node: Node, state: &WorkflowState, ctx: &RunContext) -> Option<Node> {
        let next = node.successor();
        if next == Some(Node::Merge) && state.approval_gates.is_none() {
            info!(feature = %state.feature_id, "no approval gates; skipping merge");
            ctx.record_lifecycle(&state.feature_id, Lifecycle::Review);
            return None;
        }
        next
    }

    /// One executor call with step tracking.
    pub(super) async fn execute(
        &self,
        node: Node,
        prompt: &str,
        state: &WorkflowState,
        ctx: &RunContext,
    ) -> Result<ExecuteResult> {
        let options = ExecuteOptions {
            cwd: Some(state.work_dir().to_path_buf()),
            model: self.settings.model.clone(),
            max_turns: self.settings.max_turns,
            timeout: self.settings.executor_timeout,
        };
        ctx.steps
            .record(node.as_str(), Some("executor"), StepEvent::Started, None);
        match self.executor.execute(prompt, &options).await {
            Ok(result) => {
                ctx.steps.record(
                    node.as_str(),
                    Some("executor"),
                    StepEvent::Completed,
                    result.session_id.clone(),
                );
                Ok(result)
            }
            Err(e) => {
                ctx.steps.record(
                    node.as_str(),
                    Some("executor"),
                    StepEvent::Failed,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gate helpers
// ---------------------------------------------------------------------------

pub(super) fn check_gate(
    node: Node,
    state: &WorkflowState,
    payload: Option<&ResumePayload>,
) -> Result<GateCheck> {
    let Some(gate) = node.gate() else {
        return Ok(GateCheck::Pass);
    };
    if !state.gate_closed(gate) {
        return Ok(GateCheck::Pass);
    }
    match payload {
        None => Ok(GateCheck::Interrupt),
        Some(p) => match p.decision()? {
            Decision::Approve => Ok(GateCheck::Pass),
            Decision::Reject {
                feedback,
                iteration,
            } => Ok(GateCheck::Rejected {
                feedback,
                iteration,
            }),
        },
    }
}

/// Decision fields a rejection leaves on the state. Rejection history is
/// kept here, not in `messages`.
pub(super) fn rejection_update(feedback: String, iteration: u32) -> StateUpdate {
    StateUpdate {
        approval_action: Some(Some(ApprovalAction::Rejected)),
        rejection_feedback: Some(Some(feedback)),
        needs_reexecution: Some(true),
        rejection_iteration: Some(iteration),
        ..Default::default()
    }
}

/// The state a gated node works from. A rejection is folded in before the
/// prompt is built so the single re-run already sees the feedback.
pub(super) fn decided_state<'a>(state: &'a WorkflowState, gate: &GateCheck) -> Cow<'a, WorkflowState> {
    match gate {
        GateCheck::Rejected {
            feedback,
            iteration,
        } => Cow::Owned(state.clone().reduce(rejection_update(feedback.clone(), *iteration))),
        _ => Cow::Borrowed(state),
    }
}

const SUMMARY_MAX_CHARS: usize = 200;

pub(super) fn summarize(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("completed");
    if line.chars().count() <= SUMMARY_MAX_CHARS {
        return line.to_string();
    }
    let mut s: String = line.chars().take(SUMMARY_MAX_CHARS).collect();
    s.push('…');
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
