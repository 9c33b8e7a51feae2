//! In-memory [`GitPrPort`] for graph tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CiStatus, DiffSummary, GitPrError, GitPrErrorCode, GitPrPort, GitResult, PrInfo, PrRequest,
};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub uncommitted: bool,
    pub commits: u32,
    pub pr: Option<PrInfo>,
    pub pr_merged: bool,
    pub branch_merged: bool,
    /// Whether the capability's own merge actually lands.
    pub merge_lands: bool,
    pub merge_error: Option<GitPrErrorCode>,
    /// Consumed front to back; the last entry repeats.
    pub ci: VecDeque<CiStatus>,
    pub calls: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeGitPr {
    pub state: Mutex<FakeState>,
}

impl FakeGitPr {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().merge_lands = true;
        fake
    }

    pub fn with_ci(self, statuses: Vec<CiStatus>) -> Self {
        self.state.lock().unwrap().ci = statuses.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().unwrap().calls.push(call.into());
    }
}

#[async_trait]
impl GitPrPort for FakeGitPr {
    async fn has_uncommitted_changes(&self, _cwd: &Path) -> GitResult<bool> {
        Ok(self.state.lock().unwrap().uncommitted)
    }

    async fn commit_all(&self, _cwd: &Path, _message: &str) -> GitResult<String> {
        self.record("commit_all");
        let mut s = self.state.lock().unwrap();
        s.uncommitted = false;
        s.commits += 1;
        Ok(format!("c{}", s.commits))
    }

    async fn head_commit(&self, _cwd: &Path) -> GitResult<String> {
        Ok(format!("c{}", self.state.lock().unwrap().commits))
    }

    async fn push(&self, _cwd: &Path, branch: &str) -> GitResult<()> {
        self.record(format!("push {branch}"));
        Ok(())
    }

    async fn create_pr(&self, _cwd: &Path, request: &PrRequest) -> GitResult<PrInfo> {
        self.record(format!("create_pr {}", request.head));
        let pr = PrInfo {
            number: 7,
            url: "https://github.com/acme/app/pull/7".into(),
        };
        self.state.lock().unwrap().pr = Some(pr.clone());
        Ok(pr)
    }

    async fn find_pr(&self, _cwd: &Path, _branch: &str) -> GitResult<Option<PrInfo>> {
        Ok(self.state.lock().unwrap().pr.clone())
    }

    async fn merge_pr(&self, _cwd: &Path, number: u64) -> GitResult<()> {
        self.record(format!("merge_pr {number}"));
        let mut s = self.state.lock().unwrap();
        if let Some(code) = s.merge_error {
            return Err(GitPrError::new(code, "merge rejected"));
        }
        if s.merge_lands {
            s.pr_merged = true;
        }
        Ok(())
    }

    async fn is_pr_merged(&self, _cwd: &Path, _number: u64) -> GitResult<bool> {
        Ok(self.state.lock().unwrap().pr_merged)
    }

    async fn merge_branch(&self, _cwd: &Path, feature: &str, base: &str) -> GitResult<()> {
        self.record(format!("merge_branch {feature} {base}"));
        let mut s = self.state.lock().unwrap();
        if let Some(code) = s.merge_error {
            return Err(GitPrError::new(code, "merge rejected"));
        }
        if s.merge_lands {
            s.branch_merged = true;
        }
        Ok(())
    }

    async fn verify_merged(&self, _cwd: &Path, _feature: &str, _base: &str) -> GitResult<bool> {
        Ok(self.state.lock().unwrap().branch_merged)
    }

    async fn get_ci_status(&self, _cwd: &Path, _branch: &str) -> GitResult<CiStatus> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("get_ci_status".into());
        if s.ci.len() > 1 {
            Ok(s.ci.pop_front().unwrap_or(CiStatus::NoChecks))
        } else {
            Ok(s.ci.front().cloned().unwrap_or(CiStatus::NoChecks))
        }
    }

    async fn delete_branch(&self, _cwd: &Path, branch: &str, remote: bool) -> GitResult<()> {
        self.record(format!("delete_branch {branch} remote={remote}"));
        Ok(())
    }

    async fn get_pr_diff_summary(&self, _cwd: &Path, _base: &str) -> GitResult<DiffSummary> {
        Ok(DiffSummary {
            files_changed: 2,
            insertions: 10,
            deletions: 1,
        })
    }
}
