//! Detached worker processes: one OS process per run, driving the graph
//! for that run's thread id.

mod args;
mod entry;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Result, ShepError};
use crate::paths;
use crate::run::{AgentRunStatus, RunRepository};

pub use args::WorkerArgs;
pub use entry::{run_worker, InProcessWorker, WorkerDeps, WorkerExit};

// ---------------------------------------------------------------------------
// WorkerLauncher
// ---------------------------------------------------------------------------

/// What happened when a worker was launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launched {
    /// A detached process is driving the run.
    Spawned { pid: u32 },
    /// The worker ran to its resting point in this process.
    Finished(WorkerExit),
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, args: &WorkerArgs) -> Result<Launched>;
}

#[async_trait]
impl WorkerLauncher for WorkerProcessManager {
    async fn launch(&self, args: &WorkerArgs) -> Result<Launched> {
        self.spawn(args).map(|pid| Launched::Spawned { pid })
    }
}

// ---------------------------------------------------------------------------
// LivenessProbe
// ---------------------------------------------------------------------------

pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Signal-0 probe. Any error, including EPERM, counts as not alive.
pub struct SignalProbe;

impl LivenessProbe for SignalProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        kill(Pid::from_raw(raw), None).is_ok()
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// WorkerProcessManager
// ---------------------------------------------------------------------------

pub struct WorkerProcessManager {
    root: PathBuf,
    program: PathBuf,
    runs: Arc<dyn RunRepository>,
    probe: Arc<dyn LivenessProbe>,
}

impl WorkerProcessManager {
    /// `program` is the binary that understands `worker …`, normally the
    /// current executable.
    pub fn new(root: impl Into<PathBuf>, program: impl Into<PathBuf>, runs: Arc<dyn RunRepository>) -> Self {
        Self {
            root: root.into(),
            program: program.into(),
            runs,
            probe: Arc::new(SignalProbe),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Fork a detached worker and return its pid. The child is not awaited;
    /// stdout and stderr go to `.shep/logs/<run-id>.log`.
    pub fn spawn(&self, args: &WorkerArgs) -> Result<u32> {
        let log_path = paths::run_log_path(&self.root, &args.run_id);
        crate::io::ensure_dir(&paths::logs_dir(&self.root))?;
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(args.to_argv())
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ShepError::Worker(format!("failed to spawn worker: {e}")))?;
        let pid = child.id();
        if pid == 0 {
            return Err(ShepError::Worker("worker reported no pid".into()));
        }
        info!(run_id = %args.run_id, pid, log = %log_path.display(), "worker spawned");
        Ok(pid)
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.probe.is_alive(pid)
    }

    /// Mark a run `interrupted` when its worker is gone. Returns whether
    /// this call changed the record. Safe to call repeatedly and from
    /// several processes at once.
    pub fn check_and_mark_crashed(&self, run_id: &str) -> Result<bool> {
        let Some(run) = self.runs.find_by_id(run_id)? else {
            debug!(run_id, "crash check: no such run");
            return Ok(false);
        };
        if run.status.is_terminal() || run.status == AgentRunStatus::WaitingApproval {
            return Ok(false);
        }
        let Some(pid) = run.pid else {
            return Ok(false);
        };
        if self.is_alive(pid) {
            return Ok(false);
        }
        let changed = self.runs.mark_interrupted_if_active(
            run_id,
            &format!("worker process {pid} exited unexpectedly"),
        )?;
        if changed {
            warn!(run_id, pid, "worker crashed; run marked interrupted");
        }
        Ok(changed)
    }
}
