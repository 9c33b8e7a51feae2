use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{
    CiStatus, DiffSummary, GitPrError, GitPrErrorCode, GitPrPort, GitResult, PrInfo, PrRequest,
};

/// [`GitPrPort`] over the `git` and `gh` command-line tools.
#[derive(Debug, Clone)]
pub struct ShellGitPr {
    remote: String,
}

impl Default for ShellGitPr {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Command helpers
// ---------------------------------------------------------------------------

async fn output(program: &str, cwd: &Path, args: &[&str]) -> GitResult<Output> {
    debug!(program, ?args, cwd = %cwd.display(), "exec");
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| GitPrError::from_spawn(program, e))
}

fn combined(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    format!("{}\n{}", stderr.trim(), stdout.trim())
        .trim()
        .to_string()
}

/// Run and return trimmed stdout, classifying any non-zero exit.
async fn run(program: &str, cwd: &Path, args: &[&str]) -> GitResult<String> {
    let out = output(program, cwd, args).await?;
    if !out.status.success() {
        let context = format!("{program} {}", args.join(" "));
        return Err(GitPrError::from_output(&context, &combined(&out)));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

async fn git(cwd: &Path, args: &[&str]) -> GitResult<String> {
    run("git", cwd, args).await
}

async fn gh(cwd: &Path, args: &[&str]) -> GitResult<String> {
    run("gh", cwd, args).await
}

// ---------------------------------------------------------------------------
// GitPrPort
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PrListEntry {
    number: u64,
    url: String,
}

#[derive(Deserialize)]
struct PrState {
    state: String,
}

#[derive(Deserialize)]
struct CheckEntry {
    name: String,
    #[serde(default)]
    bucket: String,
}

#[async_trait]
impl GitPrPort for ShellGitPr {
    async fn has_uncommitted_changes(&self, cwd: &Path) -> GitResult<bool> {
        let status = git(cwd, &["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn commit_all(&self, cwd: &Path, message: &str) -> GitResult<String> {
        git(cwd, &["add", "-A"]).await?;
        git(cwd, &["commit", "-m", message]).await?;
        self.head_commit(cwd).await
    }

    async fn head_commit(&self, cwd: &Path) -> GitResult<String> {
        git(cwd, &["rev-parse", "HEAD"]).await
    }

    async fn push(&self, cwd: &Path, branch: &str) -> GitResult<()> {
        git(cwd, &["push", "-u", &self.remote, branch]).await?;
        Ok(())
    }

    async fn create_pr(&self, cwd: &Path, request: &PrRequest) -> GitResult<PrInfo> {
        let url = gh(
            cwd,
            &[
                "pr",
                "create",
                "--title",
                &request.title,
                "--body",
                &request.body,
                "--base",
                &request.base,
                "--head",
                &request.head,
            ],
        )
        .await?;
        let url = url.lines().last().unwrap_or_default().trim().to_string();
        let number = parse_pr_number(&url).ok_or_else(|| {
            GitPrError::new(
                GitPrErrorCode::GitError,
                format!("could not parse PR number from '{url}'"),
            )
        })?;
        Ok(PrInfo { number, url })
    }

    async fn find_pr(&self, cwd: &Path, branch: &str) -> GitResult<Option<PrInfo>> {
        let json = gh(
            cwd,
            &[
                "pr", "list", "--head", branch, "--state", "all", "--json", "number,url",
                "--limit", "1",
            ],
        )
        .await?;
        let entries: Vec<PrListEntry> = serde_json::from_str(&json).map_err(|e| {
            GitPrError::new(GitPrErrorCode::GitError, "unreadable gh pr list output")
                .with_cause(e)
        })?;
        Ok(entries.into_iter().next().map(|e| PrInfo {
            number: e.number,
            url: e.url,
        }))
    }

    async fn merge_pr(&self, cwd: &Path, number: u64) -> GitResult<()> {
        gh(cwd, &["pr", "merge", &number.to_string(), "--squash"]).await?;
        Ok(())
    }

    async fn is_pr_merged(&self, cwd: &Path, number: u64) -> GitResult<bool> {
        let json = gh(cwd, &["pr", "view", &number.to_string(), "--json", "state"]).await?;
        let state: PrState = serde_json::from_str(&json).map_err(|e| {
            GitPrError::new(GitPrErrorCode::GitError, "unreadable gh pr view output")
                .with_cause(e)
        })?;
        Ok(state.state.eq_ignore_ascii_case("merged"))
    }

    async fn merge_branch(&self, cwd: &Path, feature: &str, base: &str) -> GitResult<()> {
        git(cwd, &["checkout", base]).await?;
        if let Err(e) = git(cwd, &["merge", "--squash", feature]).await {
            let _ = git(cwd, &["reset", "--merge"]).await;
            return Err(e);
        }
        if self.has_uncommitted_changes(cwd).await? {
            git(cwd, &["commit", "-m", &format!("Squash merge {feature}")]).await?;
        }
        Ok(())
    }

    async fn verify_merged(&self, cwd: &Path, feature: &str, base: &str) -> GitResult<bool> {
        let fork_point = git(cwd, &["merge-base", base, feature]).await?;
        let range = format!("{fork_point}..{feature}");
        let changed = git(cwd, &["diff", "--name-only", &range]).await?;
        let files: Vec<&str> = changed.lines().filter(|l| !l.is_empty()).collect();
        if files.is_empty() {
            return Ok(true);
        }

        // A squash merge leaves no ancestry, so compare the touched paths.
        let mut args = vec!["diff", "--quiet", base, feature, "--"];
        args.extend(files.iter().copied());
        let out = output("git", cwd, &args).await?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitPrError::from_output("git diff --quiet", &combined(&out))),
        }
    }

    async fn get_ci_status(&self, cwd: &Path, branch: &str) -> GitResult<CiStatus> {
        let out = output("gh", cwd, &["pr", "checks", branch, "--json", "name,bucket"]).await?;
        let text = combined(&out);
        if text.to_lowercase().contains("no checks reported") {
            return Ok(CiStatus::NoChecks);
        }
        // `gh pr checks` exits non-zero for failing or pending checks but
        // still prints the JSON list.
        let stdout = String::from_utf8_lossy(&out.stdout);
        match serde_json::from_str::<Vec<CheckEntry>>(stdout.trim()) {
            Ok(checks) => Ok(summarize_checks(&checks)),
            Err(_) if !out.status.success() => {
                Err(GitPrError::from_output(&format!("gh pr checks {branch}"), &text))
            }
            Err(e) => Err(GitPrError::new(
                GitPrErrorCode::GitError,
                "unreadable gh pr checks output",
            )
            .with_cause(e)),
        }
    }

    async fn delete_branch(&self, cwd: &Path, branch: &str, remote: bool) -> GitResult<()> {
        if remote {
            git(cwd, &["push", &self.remote, "--delete", branch]).await?;
        } else {
            git(cwd, &["branch", "-D", branch]).await?;
        }
        Ok(())
    }

    async fn get_pr_diff_summary(&self, cwd: &Path, base: &str) -> GitResult<DiffSummary> {
        let range = format!("{base}...HEAD");
        let stat = git(cwd, &["diff", "--shortstat", &range]).await?;
        Ok(parse_shortstat(&stat))
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

fn parse_pr_number(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

fn summarize_checks(checks: &[CheckEntry]) -> CiStatus {
    if checks.is_empty() {
        return CiStatus::NoChecks;
    }
    let failing: Vec<&str> = checks
        .iter()
        .filter(|c| matches!(c.bucket.as_str(), "fail" | "cancel"))
        .map(|c| c.name.as_str())
        .collect();
    if !failing.is_empty() {
        return CiStatus::Failure {
            summary: format!("failing checks: {}", failing.join(", ")),
        };
    }
    if checks.iter().any(|c| c.bucket == "pending") {
        return CiStatus::Pending;
    }
    CiStatus::Success
}

/// Parse `git diff --shortstat` output, e.g.
/// ` 3 files changed, 10 insertions(+), 2 deletions(-)`.
fn parse_shortstat(stat: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for part in stat.split(',') {
        let part = part.trim();
        let Some((n, rest)) = part.split_once(' ') else {
            continue;
        };
        let Ok(n) = n.parse::<u32>() else {
            continue;
        };
        if rest.starts_with("file") {
            summary.files_changed = n;
        } else if rest.starts_with("insertion") {
            summary.insertions = n;
        } else if rest.starts_with("deletion") {
            summary.deletions = n;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, bucket: &str) -> CheckEntry {
        CheckEntry {
            name: name.into(),
            bucket: bucket.into(),
        }
    }

    #[test]
    fn pr_number_from_url() {
        assert_eq!(parse_pr_number("https://github.com/o/r/pull/42"), Some(42));
        assert_eq!(parse_pr_number("https://github.com/o/r/pull/42/"), Some(42));
        assert_eq!(parse_pr_number("not a url"), None);
    }

    #[test]
    fn shortstat_full_and_partial() {
        assert_eq!(
            parse_shortstat(" 3 files changed, 10 insertions(+), 2 deletions(-)"),
            DiffSummary {
                files_changed: 3,
                insertions: 10,
                deletions: 2
            }
        );
        assert_eq!(
            parse_shortstat(" 1 file changed, 1 deletion(-)"),
            DiffSummary {
                files_changed: 1,
                insertions: 0,
                deletions: 1
            }
        );
        assert_eq!(parse_shortstat(""), DiffSummary::default());
    }

    #[test]
    fn checks_summary_priority() {
        assert_eq!(summarize_checks(&[]), CiStatus::NoChecks);
        assert_eq!(
            summarize_checks(&[check("lint", "pass"), check("test", "pending")]),
            CiStatus::Pending
        );
        assert_eq!(
            summarize_checks(&[check("lint", "fail"), check("test", "pending")]),
            CiStatus::Failure {
                summary: "failing checks: lint".into()
            }
        );
        assert_eq!(
            summarize_checks(&[check("lint", "pass"), check("docs", "skipping")]),
            CiStatus::Success
        );
    }

    #[tokio::test]
    async fn local_repo_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let cwd = dir.path();
        let Ok(_) = git(cwd, &["init", "-q", "-b", "main"]).await else {
            // git unavailable in this environment
            return;
        };
        git(cwd, &["config", "user.email", "t@example.com"]).await.unwrap();
        git(cwd, &["config", "user.name", "t"]).await.unwrap();

        let port = ShellGitPr::default();
        std::fs::write(cwd.join("a.txt"), "one\n").unwrap();
        assert!(port.has_uncommitted_changes(cwd).await.unwrap());
        let first = port.commit_all(cwd, "init").await.unwrap();
        assert_eq!(port.head_commit(cwd).await.unwrap(), first);

        git(cwd, &["checkout", "-q", "-b", "feat/x"]).await.unwrap();
        std::fs::write(cwd.join("b.txt"), "two\n").unwrap();
        port.commit_all(cwd, "feature").await.unwrap();
        assert!(!port.verify_merged(cwd, "feat/x", "main").await.unwrap());

        port.merge_branch(cwd, "feat/x", "main").await.unwrap();
        assert!(port.verify_merged(cwd, "feat/x", "main").await.unwrap());
    }
}
