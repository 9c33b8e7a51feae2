use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use shep_core::{
    checkpoint::SqliteCheckpointStore,
    config::{Config, ExecutorBackend},
    db::Db,
    executor::{ExecutorPort, MockExecutor},
    feature::SqliteFeatureRepository,
    git::ShellGitPr,
    observe::{SqliteExecutionStepStore, SqlitePhaseTimingStore, Sinks},
    paths,
    run::{RunHealthThresholds, RunService, SqliteRunRepository},
    worker::{InProcessWorker, WorkerDeps, WorkerLauncher, WorkerProcessManager},
    workflow::{GraphSettings, WorkflowGraph},
    ShepError,
};

use crate::executor::ClaudeExecutor;

/// An initialized project: its config and the shared store, plus the
/// wiring from those to services.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    db: Db,
    /// Separate connection for heartbeat, timing, step and lifecycle writes.
    sink_db: Db,
}

impl Workspace {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        if !paths::is_initialized(root) {
            return Err(ShepError::NotInitialized.into());
        }
        let config = Config::load(root).context("failed to load config")?;
        let db = Db::open(&paths::db_path(root)).context("failed to open run store")?;
        let sink_db = db.reopen().context("failed to open run store")?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            db,
            sink_db,
        })
    }

    pub fn runs(&self) -> Arc<SqliteRunRepository> {
        Arc::new(SqliteRunRepository::new(self.db.clone()))
    }

    pub fn checkpoints(&self) -> Arc<SqliteCheckpointStore> {
        Arc::new(SqliteCheckpointStore::new(self.db.clone()))
    }

    pub fn timings(&self) -> Arc<SqlitePhaseTimingStore> {
        Arc::new(SqlitePhaseTimingStore::new(self.db.clone()))
    }

    pub fn steps(&self) -> Arc<SqliteExecutionStepStore> {
        Arc::new(SqliteExecutionStepStore::new(self.db.clone()))
    }

    pub fn health(&self) -> RunHealthThresholds {
        RunHealthThresholds::from(&self.config.health)
    }

    fn sinks(&self) -> Sinks {
        let db = &self.sink_db;
        Sinks {
            runs: Some(Arc::new(SqliteRunRepository::new(db.clone()))),
            features: Some(Arc::new(SqliteFeatureRepository::new(db.clone()))),
            timings: Some(Arc::new(SqlitePhaseTimingStore::new(db.clone()))),
            steps: Some(Arc::new(SqliteExecutionStepStore::new(db.clone()))),
        }
    }

    fn executor(&self) -> Arc<dyn ExecutorPort> {
        match self.config.executor.backend {
            ExecutorBackend::Claude => Arc::new(ClaudeExecutor::new(&self.config.executor)),
            ExecutorBackend::Mock => Arc::new(MockExecutor::new()),
        }
    }

    pub fn worker_deps(&self) -> WorkerDeps {
        let graph = WorkflowGraph::new(
            self.executor(),
            Arc::new(ShellGitPr::default()),
            self.checkpoints(),
            GraphSettings::from(&self.config),
        );
        WorkerDeps {
            runs: self.runs(),
            graph,
            sinks: self.sinks(),
        }
    }

    fn processes(&self) -> anyhow::Result<Arc<WorkerProcessManager>> {
        let exe = std::env::current_exe().context("cannot locate the shep executable")?;
        Ok(Arc::new(WorkerProcessManager::new(
            &self.root,
            exe,
            self.runs(),
        )))
    }

    /// `foreground` runs workers inside this process instead of detaching.
    pub fn run_service(&self, foreground: bool) -> anyhow::Result<RunService> {
        let processes = self.processes()?;
        let launcher: Arc<dyn WorkerLauncher> = if foreground {
            Arc::new(InProcessWorker::new(self.worker_deps()))
        } else {
            processes.clone()
        };
        Ok(RunService::new(
            self.runs(),
            self.checkpoints(),
            launcher,
            processes,
            self.config.approval.clone(),
        ))
    }
}
