use std::ffi::OsString;
use std::path::PathBuf;

/// Flags of the hidden `shep worker` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub feature_id: String,
    pub run_id: String,
    pub repo: PathBuf,
    pub spec_dir: PathBuf,
    pub worktree_path: Option<PathBuf>,
    /// Continue the thread from its last checkpoint.
    pub resume: bool,
    /// Deliver `resume_payload` to the pending interrupt.
    pub resume_from_interrupt: bool,
    pub resume_payload: Option<String>,
    /// Defaults to the run's own thread id.
    pub thread_id: Option<String>,
}

impl WorkerArgs {
    /// Command line for re-invoking the binary as a worker.
    pub fn to_argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            "worker".into(),
            "--feature-id".into(),
            self.feature_id.clone().into(),
            "--run-id".into(),
            self.run_id.clone().into(),
            "--repo".into(),
            self.repo.clone().into(),
            "--spec-dir".into(),
            self.spec_dir.clone().into(),
        ];
        if let Some(wt) = &self.worktree_path {
            argv.push("--worktree-path".into());
            argv.push(wt.clone().into());
        }
        if self.resume {
            argv.push("--resume".into());
        }
        if self.resume_from_interrupt {
            argv.push("--resume-from-interrupt".into());
        }
        if let Some(payload) = &self.resume_payload {
            argv.push("--resume-payload".into());
            argv.push(payload.clone().into());
        }
        if let Some(thread) = &self.thread_id {
            argv.push("--thread-id".into());
            argv.push(thread.clone().into());
        }
        argv
    }
}
