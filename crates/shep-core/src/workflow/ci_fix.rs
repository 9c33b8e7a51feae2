use chrono::Utc;
use tracing::info;

use super::graph::{NodeOutcome, WorkflowGraph};
use super::node::Node;
use super::prompts;
use super::state::{CiFixOutcome, CiFixStatus, PendingCiFix, StateUpdate, WorkflowState};
use crate::error::Result;
use crate::git::CiWatchOutcome;
use crate::observe::{RunContext, StepEvent};

impl WorkflowGraph {
    /// One CI iteration: watch, resolve the previous attempt, and either
    /// stop or issue exactly one fix. `ci_fix_attempts` is the only budget
    /// counter, so a replayed checkpoint never repeats a recorded attempt.
    pub(super) async fn run_ci_fix(
        &self,
        state: &WorkflowState,
        ctx: &RunContext,
    ) -> Result<NodeOutcome> {
        let max = self.settings.ci_max_attempts;
        let attempts = state.ci_fix_attempts;
        let branch = self.settings.feature_branch(&state.feature_id);

        let mut update = StateUpdate {
            current_node: Some(Node::CiFix.as_str().to_string()),
            ..Default::default()
        };

        ctx.steps
            .record("ci_fix", Some("watch"), StepEvent::Started, None);
        let watched = self
            .git
            .watch_ci(
                state.work_dir(),
                &branch,
                self.settings.ci_watch_timeout,
                self.settings.ci_poll_interval,
            )
            .await?;

        let pending = state.ci_fix_pending.clone();
        match watched {
            CiWatchOutcome::Success => {
                if let Some(p) = pending {
                    update.ci_fix_history.push(p.resolve(CiFixOutcome::Fixed));
                }
                update.ci_fix_pending = Some(None);
                update.ci_fix_status = Some(CiFixStatus::Success);
                update.ci_status = Some(Some("success".into()));
                update.messages.push(format!("[ci_fix] CI passed after {attempts} fix attempt(s)"));
                info!(attempts, "CI passed");
                Ok(NodeOutcome::Complete { update, next: None })
            }
            CiWatchOutcome::TimedOut => {
                if let Some(p) = pending {
                    update.ci_fix_history.push(p.resolve(CiFixOutcome::Failed));
                }
                update.ci_fix_pending = Some(None);
                update.ci_fix_status = Some(CiFixStatus::Timeout);
                update.ci_status = Some(Some("timeout".into()));
                update.messages.push("[ci_fix] CI watch timed out".into());
                Ok(NodeOutcome::Complete { update, next: None })
            }
            CiWatchOutcome::Failure { summary } => {
                update.ci_status = Some(Some("failure".into()));
                let exhausted = attempts >= max;
                if let Some(p) = pending {
                    let outcome = if exhausted {
                        CiFixOutcome::Exhausted
                    } else {
                        CiFixOutcome::Failed
                    };
                    update.ci_fix_history.push(p.resolve(outcome));
                }

                if exhausted {
                    update.ci_fix_pending = Some(None);
                    update.ci_fix_status = Some(CiFixStatus::Exhausted);
                    update
                        .messages
                        .push(format!("[ci_fix] giving up after {attempts} attempt(s)"));
                    info!(attempts, max, "CI fix budget exhausted");
                    return Ok(NodeOutcome::Complete { update, next: None });
                }

                let attempt = attempts + 1;
                let started_at = Utc::now();
                let prompt = prompts::ci_fix_prompt(state, &branch, &summary, attempt, max);
                self.execute(Node::CiFix, &prompt, state, ctx).await?;

                update.ci_fix_attempts = Some(attempt);
                update.ci_fix_status = Some(CiFixStatus::Fixing);
                update.ci_fix_pending = Some(Some(PendingCiFix {
                    attempt,
                    started_at,
                    failure_summary: summary,
                }));
                update
                    .messages
                    .push(format!("[ci_fix] fix attempt {attempt} of {max} pushed"));
                Ok(NodeOutcome::Complete {
                    update,
                    next: Some(Node::CiFix),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::checkpoint::CheckpointStore;
    use crate::executor::MockExecutor;
    use crate::git::fake::FakeGitPr;
    use crate::git::CiStatus;
    use crate::workflow::graph::tests::{harness_with, state};
    use crate::workflow::{
        ApprovalGates, CiFixOutcome, CiFixStatus, GraphCommand, GraphOutcome, GraphSettings,
    };

    fn settings(max: u32) -> GraphSettings {
        GraphSettings {
            ci_max_attempts: max,
            ci_watch_timeout: Duration::from_millis(50),
            ci_poll_interval: Duration::from_millis(5),
            ..GraphSettings::default()
        }
    }

    fn pushed_state() -> crate::workflow::WorkflowState {
        let mut s = state(Some(ApprovalGates {
            allow_prd: true,
            allow_plan: true,
            allow_merge: true,
        }));
        s.push = true;
        s
    }

    fn failing() -> CiStatus {
        CiStatus::Failure {
            summary: "test suite failed".into(),
        }
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let git = FakeGitPr::new().with_ci(vec![failing()]);
        let h = harness_with(MockExecutor::new(), git, settings(3));
        h.git.state.lock().unwrap().branch_merged = true;

        let out = h
            .graph
            .invoke("t", GraphCommand::Start(pushed_state()), &h.ctx)
            .await
            .unwrap();
        let GraphOutcome::Completed(s) = out else {
            panic!("expected completion")
        };

        assert_eq!(s.ci_fix_status, CiFixStatus::Exhausted);
        assert_eq!(s.ci_fix_attempts, 3);
        assert_eq!(s.ci_fix_history.len(), 3);
        let attempts: Vec<_> = s.ci_fix_history.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(s.ci_fix_history[2].outcome, CiFixOutcome::Exhausted);
        // 5 phases + 2 merge calls + 3 fixes
        assert_eq!(h.executor.call_count(), 10);

        // Re-invoking a finished thread issues nothing further.
        h.graph
            .invoke("t", GraphCommand::Continue, &h.ctx)
            .await
            .unwrap();
        assert_eq!(h.executor.call_count(), 10);
    }

    #[tokio::test]
    async fn fixed_on_second_watch() {
        let git = FakeGitPr::new().with_ci(vec![
            CiStatus::Pending, // merge routing
            failing(),
            CiStatus::Success,
        ]);
        let h = harness_with(MockExecutor::new(), git, settings(3));
        h.git.state.lock().unwrap().branch_merged = true;

        let out = h
            .graph
            .invoke("t", GraphCommand::Start(pushed_state()), &h.ctx)
            .await
            .unwrap();
        let s = out.state();
        assert_eq!(s.ci_fix_status, CiFixStatus::Success);
        assert_eq!(s.ci_fix_attempts, 1);
        assert_eq!(s.ci_fix_history.len(), 1);
        assert_eq!(s.ci_fix_history[0].outcome, CiFixOutcome::Fixed);
        assert!(s.ci_fix_pending.is_none());
    }

    #[tokio::test]
    async fn pending_checks_time_out() {
        let git = FakeGitPr::new().with_ci(vec![CiStatus::Pending]);
        let h = harness_with(MockExecutor::new(), git, settings(3));
        h.git.state.lock().unwrap().branch_merged = true;

        let out = h
            .graph
            .invoke("t", GraphCommand::Start(pushed_state()), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out.state().ci_fix_status, CiFixStatus::Timeout);
        assert_eq!(out.state().ci_fix_attempts, 0);
    }

    #[tokio::test]
    async fn zero_budget_never_calls_the_agent() {
        let git = FakeGitPr::new().with_ci(vec![failing()]);
        let h = harness_with(MockExecutor::new(), git, settings(0));
        h.git.state.lock().unwrap().branch_merged = true;

        let out = h
            .graph
            .invoke("t", GraphCommand::Start(pushed_state()), &h.ctx)
            .await
            .unwrap();
        assert_eq!(out.state().ci_fix_status, CiFixStatus::Exhausted);
        assert!(out.state().ci_fix_history.is_empty());
        assert_eq!(h.executor.call_count(), 7);
    }

    #[tokio::test]
    async fn replay_after_crash_does_not_repeat_attempts() {
        let git = FakeGitPr::new().with_ci(vec![failing()]);
        let h = harness_with(
            MockExecutor::new().fail_when("# Fix CI", 1),
            git,
            settings(2),
        );
        h.git.state.lock().unwrap().branch_merged = true;

        // First fix attempt fails inside the agent: no checkpoint for it.
        let err = h
            .graph
            .invoke("t", GraphCommand::Start(pushed_state()), &h.ctx)
            .await;
        assert!(err.is_err());
        let cp = h.checkpoints.get("t").unwrap().unwrap();
        assert_eq!(cp.state.ci_fix_attempts, 0);

        let out = h
            .graph
            .invoke("t", GraphCommand::Continue, &h.ctx)
            .await
            .unwrap();
        let s = out.state();
        assert_eq!(s.ci_fix_status, CiFixStatus::Exhausted);
        let attempts: Vec<_> = s.ci_fix_history.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2]);
    }
}
