//! Git and GitHub capability used by the merge and CI-fix nodes.
//!
//! The graph only talks to [`GitPrPort`]; [`ShellGitPr`] implements it over
//! the `git` and `gh` binaries. Every failure surfaces as a classified
//! [`GitPrError`].

mod error;
mod shell;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{classify, GitPrError, GitPrErrorCode};
pub use shell::ShellGitPr;

pub type GitResult<T> = std::result::Result<T, GitPrError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl DiffSummary {
    pub fn describe(&self) -> String {
        format!(
            "{} files changed, +{} -{}",
            self.files_changed, self.insertions, self.deletions
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiStatus {
    /// The repository reports no checks for the branch.
    NoChecks,
    Pending,
    Success,
    Failure { summary: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiWatchOutcome {
    Success,
    Failure { summary: String },
    TimedOut,
}

#[async_trait]
pub trait GitPrPort: Send + Sync {
    async fn has_uncommitted_changes(&self, cwd: &Path) -> GitResult<bool>;

    /// Stage everything and commit; returns the new HEAD.
    async fn commit_all(&self, cwd: &Path, message: &str) -> GitResult<String>;

    async fn head_commit(&self, cwd: &Path) -> GitResult<String>;

    async fn push(&self, cwd: &Path, branch: &str) -> GitResult<()>;

    async fn create_pr(&self, cwd: &Path, request: &PrRequest) -> GitResult<PrInfo>;

    /// The open or merged PR whose head is `branch`, if any.
    async fn find_pr(&self, cwd: &Path, branch: &str) -> GitResult<Option<PrInfo>>;

    async fn merge_pr(&self, cwd: &Path, number: u64) -> GitResult<()>;

    async fn is_pr_merged(&self, cwd: &Path, number: u64) -> GitResult<bool>;

    /// Squash-merge `feature` into `base` locally and commit.
    async fn merge_branch(&self, cwd: &Path, feature: &str, base: &str) -> GitResult<()>;

    /// Whether `base` contains the changes of `feature`.
    async fn verify_merged(&self, cwd: &Path, feature: &str, base: &str) -> GitResult<bool>;

    async fn get_ci_status(&self, cwd: &Path, branch: &str) -> GitResult<CiStatus>;

    async fn delete_branch(&self, cwd: &Path, branch: &str, remote: bool) -> GitResult<()>;

    async fn get_pr_diff_summary(&self, cwd: &Path, base: &str) -> GitResult<DiffSummary>;

    /// Poll [`get_ci_status`](Self::get_ci_status) until the checks settle
    /// or `timeout` elapses.
    async fn watch_ci(
        &self,
        cwd: &Path,
        branch: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> GitResult<CiWatchOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_ci_status(cwd, branch).await? {
                CiStatus::Success | CiStatus::NoChecks => return Ok(CiWatchOutcome::Success),
                CiStatus::Failure { summary } => return Ok(CiWatchOutcome::Failure { summary }),
                CiStatus::Pending => {}
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(CiWatchOutcome::TimedOut);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}
