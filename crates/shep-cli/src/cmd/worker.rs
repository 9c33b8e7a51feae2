use std::path::{Path, PathBuf};

use clap::Args;
use shep_core::worker::{run_worker, WorkerArgs, WorkerExit};

use super::runtime;
use crate::workspace::Workspace;

/// Flags passed by the parent process when it detaches a worker.
#[derive(Args, Debug)]
pub struct WorkerCommand {
    #[arg(long)]
    pub feature_id: String,
    #[arg(long)]
    pub run_id: String,
    #[arg(long)]
    pub repo: PathBuf,
    #[arg(long)]
    pub spec_dir: PathBuf,
    #[arg(long)]
    pub worktree_path: Option<PathBuf>,
    #[arg(long)]
    pub resume: bool,
    #[arg(long, requires = "resume_payload")]
    pub resume_from_interrupt: bool,
    #[arg(long)]
    pub resume_payload: Option<String>,
    #[arg(long)]
    pub thread_id: Option<String>,
}

impl From<WorkerCommand> for WorkerArgs {
    fn from(c: WorkerCommand) -> Self {
        WorkerArgs {
            feature_id: c.feature_id,
            run_id: c.run_id,
            repo: c.repo,
            spec_dir: c.spec_dir,
            worktree_path: c.worktree_path,
            resume: c.resume,
            resume_from_interrupt: c.resume_from_interrupt,
            resume_payload: c.resume_payload,
            thread_id: c.thread_id,
        }
    }
}

pub fn run(root: &Path, cmd: WorkerCommand) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let args = WorkerArgs::from(cmd);
    tracing::info!(run_id = %args.run_id, feature_id = %args.feature_id, "worker started");

    let exit = runtime()?.block_on(run_worker(&args, &ws.worker_deps()))?;
    match &exit {
        WorkerExit::Completed => tracing::info!(run_id = %args.run_id, "run completed"),
        WorkerExit::WaitingApproval { node } => {
            tracing::info!(run_id = %args.run_id, %node, "waiting for approval")
        }
        WorkerExit::Failed { error } => {
            tracing::error!(run_id = %args.run_id, %error, "run failed")
        }
    }
    Ok(())
}
