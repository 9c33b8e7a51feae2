use std::path::Path;

use tracing::warn;

use super::graph::{
    check_gate, decided_state, rejection_update, summarize, GateCheck, NodeOutcome, WorkflowGraph,
};
use super::node::Node;
use super::prompts;
use super::resume::ResumePayload;
use super::state::{CiFixStatus, StateUpdate, WorkflowState};
use crate::error::Result;
use crate::feature::Lifecycle;
use crate::git::{CiStatus, GitPrError, GitPrErrorCode, PrInfo, PrRequest};
use crate::observe::{RunContext, StepEvent};

impl WorkflowGraph {
    /// Commit, optionally push and open a PR, wait at the merge gate, then
    /// squash-merge and verify the result against the repository.
    pub(super) async fn run_merge(
        &self,
        state: &WorkflowState,
        payload: Option<&ResumePayload>,
        ctx: &RunContext,
    ) -> Result<NodeOutcome> {
        let gate = check_gate(Node::Merge, state, payload)?;
        let decided = decided_state(state, &gate);
        let state: &WorkflowState = &decided;

        let work_dir = state.work_dir();
        let base = self.settings.base_branch.clone();
        let branch = self.settings.feature_branch(&state.feature_id);

        // Commit / push / PR
        let diff = match self.git.get_pr_diff_summary(work_dir, &base).await {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(error = %e, "diff summary unavailable");
                None
            }
        };
        let prompt = prompts::commit_prompt(state, &branch, &base, diff.as_ref());
        self.execute(Node::Merge, &prompt, state, ctx).await?;

        if self.git.has_uncommitted_changes(work_dir).await? {
            ctx.steps
                .record("merge", Some("commit"), StepEvent::Info, None);
            self.git
                .commit_all(work_dir, &format!("feat: {}", state.feature_id))
                .await?;
        }
        let commit_hash = self.git.head_commit(work_dir).await?;
        if state.pushes_branch() {
            ctx.steps.record("merge", Some("push"), StepEvent::Info, None);
            self.git.push(work_dir, &branch).await?;
        }
        let pr = if state.open_pr {
            Some(self.ensure_pr(work_dir, state, &branch, &base).await?)
        } else {
            None
        };

        match gate {
            GateCheck::Interrupt => return Ok(NodeOutcome::Interrupt(StateUpdate::default())),
            GateCheck::Rejected {
                feedback,
                iteration,
            } => return Ok(NodeOutcome::Interrupt(rejection_update(feedback, iteration))),
            GateCheck::Pass => {}
        }

        // Merge
        let prompt = prompts::merge_prompt(state, &branch, &base, pr.as_ref());
        let result = self.execute(Node::Merge, &prompt, state, ctx).await?;
        self.ensure_merged(state, pr.as_ref(), &branch, &base, ctx)
            .await?;
        ctx.record_lifecycle(&state.feature_id, Lifecycle::Review);

        if pr.is_some() {
            if let Err(e) = self.git.delete_branch(work_dir, &branch, true).await {
                warn!(branch = %branch, error = %e, "remote branch cleanup failed");
            }
        }

        // CI routing
        let mut ci_status = None;
        let mut next = None;
        if self.settings.ci_enabled && state.pushes_branch() {
            let status = self.git.get_ci_status(work_dir, &branch).await?;
            ci_status = Some(ci_status_label(&status).to_string());
            if status != CiStatus::NoChecks {
                next = Some(Node::CiFix);
            }
        }

        let mut update = StateUpdate::completed("merge", &summarize(&result.result)).clear_decision();
        update.commit_hash = Some(Some(commit_hash));
        update.pr_url = Some(pr.as_ref().map(|p| p.url.clone()));
        update.pr_number = Some(pr.as_ref().map(|p| p.number));
        update.ci_status = Some(ci_status);
        if next.is_some() {
            update.ci_fix_status = Some(CiFixStatus::Watching);
        }
        Ok(NodeOutcome::Complete { update, next })
    }

    async fn ensure_pr(
        &self,
        work_dir: &Path,
        state: &WorkflowState,
        branch: &str,
        base: &str,
    ) -> Result<PrInfo> {
        if let Some(pr) = self.git.find_pr(work_dir, branch).await? {
            return Ok(pr);
        }
        let request = PrRequest {
            title: format!("feat: {}", state.feature_id),
            body: state.messages.join("\n"),
            base: base.to_string(),
            head: branch.to_string(),
        };
        Ok(self.git.create_pr(work_dir, &request).await?)
    }

    async fn is_merged(
        &self,
        state: &WorkflowState,
        pr: Option<&PrInfo>,
        branch: &str,
        base: &str,
    ) -> Result<bool> {
        Ok(match pr {
            Some(pr) => self.git.is_pr_merged(state.work_dir(), pr.number).await?,
            None => {
                self.git
                    .verify_merged(&state.repository_path, branch, base)
                    .await?
            }
        })
    }

    /// Verify the agent's merge; fall back to merging ourselves once.
    async fn ensure_merged(
        &self,
        state: &WorkflowState,
        pr: Option<&PrInfo>,
        branch: &str,
        base: &str,
        ctx: &RunContext,
    ) -> Result<()> {
        if self.is_merged(state, pr, branch, base).await? {
            return Ok(());
        }
        warn!(branch, "agent merge not observed; merging directly");
        ctx.steps
            .record("merge", Some("fallback"), StepEvent::Info, None);
        match pr {
            Some(pr) => self.git.merge_pr(state.work_dir(), pr.number).await?,
            None => {
                self.git
                    .merge_branch(&state.repository_path, branch, base)
                    .await?
            }
        }
        if self.is_merged(state, pr, branch, base).await? {
            return Ok(());
        }
        Err(GitPrError::new(
            GitPrErrorCode::MergeFailed,
            format!("{branch} is not merged into {base} after fallback merge"),
        )
        .into())
    }
}

fn ci_status_label(status: &CiStatus) -> &'static str {
    match status {
        CiStatus::NoChecks => "no_checks",
        CiStatus::Pending => "pending",
        CiStatus::Success => "success",
        CiStatus::Failure { .. } => "failure",
    }
}
