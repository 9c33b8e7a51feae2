use std::sync::Arc;

use tracing::{info, warn};

use super::{AgentRunRecord, AgentRunStatus, RunRepository, RunRequest};
use crate::checkpoint::CheckpointStore;
use crate::config::ApprovalConfig;
use crate::error::{Result, ShepError};
use crate::paths;
use crate::worker::{Launched, WorkerArgs, WorkerExit, WorkerLauncher, WorkerProcessManager};
use crate::workflow::ResumePayload;

/// Result of handing a run to a worker.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The record as stored after the launch.
    pub run: AgentRunRecord,
    /// Pid of the detached worker, if one was spawned.
    pub pid: Option<u32>,
    /// How an in-process worker stopped.
    pub exit: Option<WorkerExit>,
    pub warning: Option<String>,
}

/// Run lifecycle operations behind the CLI: submit, approve, reject, resume
/// and crash sweeping.
pub struct RunService {
    runs: Arc<dyn RunRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    launcher: Arc<dyn WorkerLauncher>,
    processes: Arc<WorkerProcessManager>,
    approval: ApprovalConfig,
}

impl RunService {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        launcher: Arc<dyn WorkerLauncher>,
        processes: Arc<WorkerProcessManager>,
        approval: ApprovalConfig,
    ) -> Self {
        Self {
            runs,
            checkpoints,
            launcher,
            processes,
            approval,
        }
    }

    pub fn get(&self, run_id: &str) -> Result<AgentRunRecord> {
        self.runs
            .find_by_id(run_id)?
            .ok_or_else(|| ShepError::RunNotFound(run_id.to_string()))
    }

    /// Create a `pending` run and hand it to a worker.
    pub async fn submit(&self, request: RunRequest) -> Result<SubmitOutcome> {
        paths::validate_feature_id(&request.feature_id)?;
        let run = AgentRunRecord::pending(request);
        self.runs.create(&run)?;
        info!(run_id = %run.id, feature = %run.feature_id, "run submitted");

        let args = worker_args(&run);
        let launched = match self.launcher.launch(&args).await {
            Ok(l) => l,
            Err(e) => {
                self.runs.update_status(
                    &run.id,
                    AgentRunStatus::Failed,
                    None,
                    Some(&e.to_string()),
                )?;
                return Err(e);
            }
        };
        self.finish(&run.id, AgentRunStatus::Pending, launched, None)
    }

    /// Approve the gate a `waiting_approval` run is paused at.
    pub async fn approve(&self, run_id: &str) -> Result<SubmitOutcome> {
        let run = self.claim(run_id, "approve", &[AgentRunStatus::WaitingApproval])?;
        let mut args = worker_args(&run);
        args.resume_from_interrupt = true;
        args.resume_payload = Some(ResumePayload::approve().to_json()?);
        info!(run_id, "approval delivered");
        self.relaunch(&run, args, None).await
    }

    /// Reject the pending gate; the node re-runs with `feedback`.
    pub async fn reject(&self, run_id: &str, feedback: &str) -> Result<SubmitOutcome> {
        let current = self.get(run_id)?;
        let checkpoint = self
            .checkpoints
            .get(&current.thread_id)?
            .ok_or_else(|| ShepError::NoCheckpoint(current.thread_id.clone()))?;
        let iteration = checkpoint.state.rejection_iteration + 1;

        let run = self.claim(run_id, "reject", &[AgentRunStatus::WaitingApproval])?;
        let warning = (iteration > self.approval.rejection_warning_threshold).then(|| {
            format!(
                "this gate has been rejected {iteration} times; consider revising the feature spec"
            )
        });
        if let Some(w) = &warning {
            warn!(run_id, iteration, "{w}");
        }

        let mut args = worker_args(&run);
        args.resume_from_interrupt = true;
        args.resume_payload = Some(ResumePayload::reject(feedback, iteration).to_json()?);
        info!(run_id, iteration, "rejection delivered");
        self.relaunch(&run, args, warning).await
    }

    /// Continue a `failed` or `interrupted` run from its last checkpoint.
    pub async fn resume(&self, run_id: &str) -> Result<SubmitOutcome> {
        let run = self.claim(
            run_id,
            "resume",
            &[AgentRunStatus::Failed, AgentRunStatus::Interrupted],
        )?;
        let mut args = worker_args(&run);
        args.resume = true;
        info!(run_id, "run resumed");
        self.relaunch(&run, args, None).await
    }

    /// Probe every active run and mark those whose worker is gone.
    /// Returns the ids that were marked.
    pub fn sweep_crashed(&self) -> Result<Vec<String>> {
        let mut marked = Vec::new();
        for run in self.runs.list_active()? {
            if self.processes.check_and_mark_crashed(&run.id)? {
                marked.push(run.id);
            }
        }
        Ok(marked)
    }

    /// Move the run to `running` under this process's pid, provided it is
    /// still in one of `allowed`. Two racing callers cannot both win.
    fn claim(
        &self,
        run_id: &str,
        action: &str,
        allowed: &[AgentRunStatus],
    ) -> Result<AgentRunRecord> {
        let run = self.get(run_id)?;
        let invalid = |status: AgentRunStatus| ShepError::InvalidRunState {
            run_id: run_id.to_string(),
            status: status.to_string(),
            action: action.to_string(),
        };
        if !allowed.contains(&run.status) {
            return Err(invalid(run.status));
        }
        if !self
            .runs
            .mark_running_if(run_id, std::process::id(), run.status)?
        {
            let now = self.get(run_id)?.status;
            return Err(invalid(now));
        }
        Ok(run)
    }

    async fn relaunch(
        &self,
        run: &AgentRunRecord,
        args: WorkerArgs,
        warning: Option<String>,
    ) -> Result<SubmitOutcome> {
        match self.launcher.launch(&args).await {
            Ok(launched) => self.finish(&run.id, AgentRunStatus::Running, launched, warning),
            Err(e) => {
                // Put the run back where it was so the action can be retried.
                self.runs
                    .update_status(&run.id, run.status, None, run.error.as_deref())?;
                Err(e)
            }
        }
    }

    fn finish(
        &self,
        run_id: &str,
        expected: AgentRunStatus,
        launched: Launched,
        warning: Option<String>,
    ) -> Result<SubmitOutcome> {
        let (pid, exit) = match launched {
            Launched::Spawned { pid } => {
                // A worker that already recorded itself wins.
                self.runs.mark_running_if(run_id, pid, expected)?;
                (Some(pid), None)
            }
            Launched::Finished(exit) => (None, Some(exit)),
        };
        Ok(SubmitOutcome {
            run: self.get(run_id)?,
            pid,
            exit,
            warning,
        })
    }
}

fn worker_args(run: &AgentRunRecord) -> WorkerArgs {
    WorkerArgs {
        feature_id: run.feature_id.clone(),
        run_id: run.id.clone(),
        repo: run.repository_path.clone(),
        spec_dir: run.spec_dir.clone(),
        worktree_path: run.worktree_path.clone(),
        resume: false,
        resume_from_interrupt: false,
        resume_payload: None,
        thread_id: Some(run.thread_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint::SqliteCheckpointStore;
    use crate::db::Db;
    use crate::executor::MockExecutor;
    use crate::git::fake::FakeGitPr;
    use crate::observe::Sinks;
    use crate::run::SqliteRunRepository;
    use crate::worker::{InProcessWorker, LivenessProbe, WorkerDeps};
    use crate::workflow::{ApprovalGates, GraphSettings, Node, WorkflowGraph};

    struct DeadProbe;

    impl LivenessProbe for DeadProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    struct Fixture {
        service: RunService,
        runs: Arc<SqliteRunRepository>,
        checkpoints: Arc<SqliteCheckpointStore>,
        executor: Arc<MockExecutor>,
    }

    fn fixture(executor: MockExecutor) -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let runs = Arc::new(SqliteRunRepository::new(db.clone()));
        let checkpoints = Arc::new(SqliteCheckpointStore::new(db));
        let executor = Arc::new(executor);
        let graph = WorkflowGraph::new(
            executor.clone(),
            Arc::new(FakeGitPr::new()),
            checkpoints.clone(),
            GraphSettings::default(),
        );
        let worker = InProcessWorker::new(WorkerDeps {
            runs: runs.clone(),
            graph,
            sinks: Sinks {
                runs: Some(runs.clone()),
                ..Default::default()
            },
        });
        let processes = Arc::new(
            WorkerProcessManager::new("/tmp", "shep", runs.clone()).with_probe(Arc::new(DeadProbe)),
        );
        let service = RunService::new(
            runs.clone(),
            checkpoints.clone(),
            Arc::new(worker),
            processes,
            ApprovalConfig {
                rejection_warning_threshold: 1,
            },
        );
        Fixture {
            service,
            runs,
            checkpoints,
            executor,
        }
    }

    fn request(gates: Option<ApprovalGates>) -> RunRequest {
        RunRequest {
            feature_id: "auth-login".into(),
            repository_path: "/repo".into(),
            spec_dir: "/repo/specs/auth-login".into(),
            worktree_path: None,
            approval_gates: gates,
            push: false,
            open_pr: false,
        }
    }

    #[tokio::test]
    async fn submit_runs_to_completion_in_process() {
        let f = fixture(MockExecutor::new());
        let out = f.service.submit(request(None)).await.unwrap();
        assert_eq!(out.exit, Some(WorkerExit::Completed));
        assert_eq!(out.run.status, AgentRunStatus::Completed);
        assert_eq!(out.pid, None);
        assert_eq!(f.executor.call_count(), 5);
    }

    #[tokio::test]
    async fn submit_rejects_bad_feature_id() {
        let f = fixture(MockExecutor::new());
        let mut req = request(None);
        req.feature_id = "Bad Id".into();
        assert!(matches!(
            f.service.submit(req).await,
            Err(ShepError::InvalidFeatureId(_))
        ));
        assert!(f.runs.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_walks_through_gates() {
        let f = fixture(MockExecutor::new());
        let out = f
            .service
            .submit(request(Some(ApprovalGates::default())))
            .await
            .unwrap();
        assert_eq!(
            out.exit,
            Some(WorkerExit::WaitingApproval {
                node: Node::Requirements
            })
        );
        assert_eq!(f.executor.call_count(), 2);

        let out = f.service.approve(&out.run.id).await.unwrap();
        assert_eq!(out.exit, Some(WorkerExit::WaitingApproval { node: Node::Plan }));
        assert_eq!(out.run.waiting_at(), Some("plan"));
        assert_eq!(f.executor.call_count(), 5);
    }

    #[tokio::test]
    async fn reject_increments_iteration_and_warns_past_threshold() {
        let f = fixture(MockExecutor::new());
        let run = f
            .service
            .submit(request(Some(ApprovalGates::default())))
            .await
            .unwrap()
            .run;

        let first = f.service.reject(&run.id, "add error cases").await.unwrap();
        assert!(first.warning.is_none());
        let cp = f.checkpoints.get(&run.thread_id).unwrap().unwrap();
        assert_eq!(cp.state.rejection_iteration, 1);
        assert_eq!(first.run.status, AgentRunStatus::WaitingApproval);

        let second = f.service.reject(&run.id, "still thin").await.unwrap();
        assert!(second.warning.unwrap().contains("2 times"));
        let cp = f.checkpoints.get(&run.thread_id).unwrap().unwrap();
        assert_eq!(cp.state.rejection_iteration, 2);
    }

    #[tokio::test]
    async fn actions_require_the_right_status() {
        let f = fixture(MockExecutor::new());
        let run = f.service.submit(request(None)).await.unwrap().run;

        let err = f.service.approve(&run.id).await.unwrap_err();
        assert!(matches!(err, ShepError::InvalidRunState { ref action, .. } if action == "approve"));
        let err = f.service.resume(&run.id).await.unwrap_err();
        assert!(matches!(err, ShepError::InvalidRunState { ref status, .. } if status == "completed"));
        assert!(matches!(
            f.service.approve("missing").await,
            Err(ShepError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn resume_after_failure_completes() {
        let f = fixture(MockExecutor::new().fail_when("# Research", 1));
        let run = f.service.submit(request(None)).await.unwrap().run;
        assert_eq!(run.status, AgentRunStatus::Failed);

        let out = f.service.resume(&run.id).await.unwrap();
        assert_eq!(out.run.status, AgentRunStatus::Completed);
        assert_eq!(out.run.error, None);
    }

    #[tokio::test]
    async fn sweep_marks_dead_workers() {
        let f = fixture(MockExecutor::new());
        let rec = AgentRunRecord::pending(request(None));
        f.runs.create(&rec).unwrap();
        f.runs.mark_running(&rec.id, 4242).unwrap();

        assert_eq!(f.service.sweep_crashed().unwrap(), vec![rec.id.clone()]);
        assert!(f.service.sweep_crashed().unwrap().is_empty());
        assert_eq!(
            f.service.get(&rec.id).unwrap().status,
            AgentRunStatus::Interrupted
        );
    }

    struct RecordingLauncher(Mutex<Vec<WorkerArgs>>);

    #[async_trait]
    impl WorkerLauncher for RecordingLauncher {
        async fn launch(&self, args: &WorkerArgs) -> Result<Launched> {
            self.0.lock().unwrap().push(args.clone());
            Ok(Launched::Spawned { pid: 31337 })
        }
    }

    #[tokio::test]
    async fn detached_launch_records_child_pid() {
        let db = Db::open_in_memory().unwrap();
        let runs = Arc::new(SqliteRunRepository::new(db.clone()));
        let launcher = Arc::new(RecordingLauncher(Mutex::new(Vec::new())));
        let service = RunService::new(
            runs.clone(),
            Arc::new(SqliteCheckpointStore::new(db)),
            launcher.clone(),
            Arc::new(WorkerProcessManager::new("/tmp", "shep", runs.clone())),
            ApprovalConfig::default(),
        );

        let out = service.submit(request(None)).await.unwrap();
        assert_eq!(out.pid, Some(31337));
        assert_eq!(out.run.status, AgentRunStatus::Running);
        assert_eq!(out.run.pid, Some(31337));

        let args = launcher.0.lock().unwrap()[0].clone();
        assert_eq!(args.run_id, out.run.id);
        assert_eq!(args.thread_id.as_deref(), Some(out.run.thread_id.as_str()));
        assert!(!args.resume && !args.resume_from_interrupt);
    }
}
