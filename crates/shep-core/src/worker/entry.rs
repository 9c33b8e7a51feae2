use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{Launched, WorkerArgs, WorkerLauncher};
use crate::error::{Result, ShepError};
use crate::observe::{RunContext, Sinks};
use crate::run::{AgentRunRecord, AgentRunStatus, RunRepository};
use crate::workflow::{GraphCommand, GraphOutcome, Node, ResumePayload, WorkflowGraph, WorkflowState};

pub struct WorkerDeps {
    pub runs: Arc<dyn RunRepository>,
    pub graph: WorkflowGraph,
    pub sinks: Sinks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    WaitingApproval { node: Node },
    Failed { error: String },
}

/// Runs the worker inside the calling process (`shep run --foreground`).
pub struct InProcessWorker {
    deps: WorkerDeps,
}

impl InProcessWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessWorker {
    async fn launch(&self, args: &WorkerArgs) -> Result<Launched> {
        run_worker(args, &self.deps).await.map(Launched::Finished)
    }
}

/// Drive one run's graph to its next resting point and record the result.
///
/// This is the only place node errors are caught: they mark the run
/// `failed` and are reported as [`WorkerExit::Failed`]. Errors returned
/// from this function are bookkeeping failures (unknown run, store down).
pub async fn run_worker(args: &WorkerArgs, deps: &WorkerDeps) -> Result<WorkerExit> {
    let run = deps
        .runs
        .find_by_id(&args.run_id)?
        .ok_or_else(|| ShepError::RunNotFound(args.run_id.clone()))?;

    let pid = std::process::id();
    deps.runs.mark_running(&run.id, pid)?;
    info!(run_id = %run.id, feature = %args.feature_id, pid, "worker started");

    let thread_id = args.thread_id.clone().unwrap_or_else(|| run.thread_id.clone());
    let ctx = RunContext::new(run.id.clone(), deps.sinks.clone());

    let outcome = match command_for(args, &run) {
        Ok(command) => deps.graph.invoke(&thread_id, command, &ctx).await,
        Err(e) => Err(e),
    };

    // Queued heartbeats must land before the final status.
    ctx.drain().await;

    let exit = match outcome {
        Ok(GraphOutcome::Completed(_)) => {
            deps.runs
                .update_status(&run.id, AgentRunStatus::Completed, None, None)?;
            info!(run_id = %run.id, "run completed");
            WorkerExit::Completed
        }
        Ok(GraphOutcome::Interrupted { node, .. }) => {
            deps.runs.update_status(
                &run.id,
                AgentRunStatus::WaitingApproval,
                Some(&format!("interrupt:{node}")),
                None,
            )?;
            info!(run_id = %run.id, node = %node, "run waiting for approval");
            WorkerExit::WaitingApproval { node }
        }
        Err(e) => {
            let message = e.to_string();
            error!(run_id = %run.id, error = %message, "run failed");
            deps.runs
                .update_status(&run.id, AgentRunStatus::Failed, None, Some(&message))?;
            WorkerExit::Failed { error: message }
        }
    };
    Ok(exit)
}

fn command_for(args: &WorkerArgs, run: &AgentRunRecord) -> Result<GraphCommand> {
    if args.resume_from_interrupt {
        let json = args.resume_payload.as_deref().ok_or_else(|| {
            ShepError::InvalidResumePayload("--resume-payload is required".into())
        })?;
        return Ok(GraphCommand::Resume(ResumePayload::parse(json)?));
    }
    if args.resume {
        return Ok(GraphCommand::Continue);
    }
    let state = WorkflowState::new(&args.feature_id, &args.repo, &args.spec_dir)
        .with_worktree(args.worktree_path.clone())
        .with_gates(run.approval_gates)
        .with_merge_options(run.push, run.open_pr);
    Ok(GraphCommand::Start(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SqliteCheckpointStore;
    use crate::db::Db;
    use crate::executor::MockExecutor;
    use crate::git::fake::FakeGitPr;
    use crate::run::{RunRequest, SqliteRunRepository};
    use crate::workflow::{ApprovalGates, GraphSettings};

    struct Fixture {
        runs: Arc<SqliteRunRepository>,
        executor: Arc<MockExecutor>,
        deps: WorkerDeps,
    }

    fn fixture(executor: MockExecutor) -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let runs = Arc::new(SqliteRunRepository::new(db.clone()));
        let executor = Arc::new(executor);
        let graph = WorkflowGraph::new(
            executor.clone(),
            Arc::new(FakeGitPr::new()),
            Arc::new(SqliteCheckpointStore::new(db)),
            GraphSettings::default(),
        );
        let deps = WorkerDeps {
            runs: runs.clone(),
            graph,
            sinks: Sinks {
                runs: Some(runs.clone()),
                ..Default::default()
            },
        };
        Fixture {
            runs,
            executor,
            deps,
        }
    }

    fn new_run(f: &Fixture, gates: Option<ApprovalGates>) -> (AgentRunRecord, WorkerArgs) {
        let rec = AgentRunRecord::pending(RunRequest {
            feature_id: "auth".into(),
            repository_path: "/repo".into(),
            spec_dir: "/repo/specs/auth".into(),
            worktree_path: None,
            approval_gates: gates,
            push: false,
            open_pr: false,
        });
        f.runs.create(&rec).unwrap();
        let args = WorkerArgs {
            feature_id: rec.feature_id.clone(),
            run_id: rec.id.clone(),
            repo: rec.repository_path.clone(),
            spec_dir: rec.spec_dir.clone(),
            worktree_path: None,
            resume: false,
            resume_from_interrupt: false,
            resume_payload: None,
            thread_id: None,
        };
        (rec, args)
    }

    #[tokio::test]
    async fn completed_run_is_marked_completed() {
        let f = fixture(MockExecutor::new());
        let (rec, args) = new_run(&f, None);
        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert_eq!(exit, WorkerExit::Completed);

        let got = f.runs.find_by_id(&rec.id).unwrap().unwrap();
        assert_eq!(got.status, AgentRunStatus::Completed);
        assert_eq!(got.pid, Some(std::process::id()));
        assert_eq!(got.last_node(), Some("implement"));
        assert!(got.completed_at.is_some());
    }

    #[tokio::test]
    async fn gate_then_resume_from_interrupt() {
        let f = fixture(MockExecutor::new());
        let (rec, mut args) = new_run(&f, Some(ApprovalGates::default()));

        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert_eq!(
            exit,
            WorkerExit::WaitingApproval {
                node: Node::Requirements
            }
        );
        let got = f.runs.find_by_id(&rec.id).unwrap().unwrap();
        assert_eq!(got.status, AgentRunStatus::WaitingApproval);
        assert_eq!(got.waiting_at(), Some("requirements"));

        args.resume_from_interrupt = true;
        args.resume_payload = Some(ResumePayload::approve().to_json().unwrap());
        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert_eq!(exit, WorkerExit::WaitingApproval { node: Node::Plan });
        assert_eq!(f.executor.call_count(), 5);
    }

    #[tokio::test]
    async fn node_failure_marks_run_failed_then_resume_continues() {
        let f = fixture(MockExecutor::new().fail_when("# Plan", 1));
        let (rec, mut args) = new_run(&f, None);

        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert!(matches!(exit, WorkerExit::Failed { .. }));
        let got = f.runs.find_by_id(&rec.id).unwrap().unwrap();
        assert_eq!(got.status, AgentRunStatus::Failed);
        assert!(got.error.unwrap().contains("mock executor failure"));

        args.resume = true;
        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert_eq!(exit, WorkerExit::Completed);
        let got = f.runs.find_by_id(&rec.id).unwrap().unwrap();
        assert_eq!(got.error, None);
        assert_eq!(f.executor.call_count(), 6);
    }

    #[tokio::test]
    async fn missing_payload_fails_the_run() {
        let f = fixture(MockExecutor::new());
        let (rec, mut args) = new_run(&f, None);
        args.resume_from_interrupt = true;
        let exit = run_worker(&args, &f.deps).await.unwrap();
        assert!(matches!(exit, WorkerExit::Failed { .. }));
        assert_eq!(
            f.runs.find_by_id(&rec.id).unwrap().unwrap().status,
            AgentRunStatus::Failed
        );
    }

    #[tokio::test]
    async fn unknown_run_is_an_error() {
        let f = fixture(MockExecutor::new());
        let (_, mut args) = new_run(&f, None);
        args.run_id = "nope".into();
        assert!(matches!(
            run_worker(&args, &f.deps).await,
            Err(ShepError::RunNotFound(_))
        ));
    }
}
