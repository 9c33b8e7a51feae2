use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use shep_core::run::RunRequest;
use shep_core::workflow::ApprovalGates;

use super::{report, runtime};
use crate::workspace::Workspace;

#[derive(Args)]
pub struct RunArgs {
    /// Feature id (lowercase, digits, hyphens); also names the branch
    pub feature_id: String,

    /// Repository the agent works in (default: project root)
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Directory holding the feature spec (default: <repo>/specs/<feature-id>)
    #[arg(long)]
    pub spec_dir: Option<PathBuf>,

    /// Run in this worktree instead of the repository checkout
    #[arg(long)]
    pub worktree_path: Option<PathBuf>,

    /// Skip the approval gate after requirements
    #[arg(long)]
    pub allow_prd: bool,

    /// Skip the approval gate after planning
    #[arg(long)]
    pub allow_plan: bool,

    /// Skip the approval gate before merging
    #[arg(long)]
    pub allow_merge: bool,

    /// Run without any gates; the merge phase is skipped
    #[arg(long, conflicts_with_all = ["allow_prd", "allow_plan", "allow_merge"])]
    pub no_gates: bool,

    /// Push the feature branch during merge
    #[arg(long)]
    pub push: bool,

    /// Open a pull request during merge (implies --push)
    #[arg(long)]
    pub open_pr: bool,

    /// Run the worker in this process instead of detaching it
    #[arg(long)]
    pub foreground: bool,
}

impl RunArgs {
    fn gates(&self) -> Option<ApprovalGates> {
        (!self.no_gates).then_some(ApprovalGates {
            allow_prd: self.allow_prd,
            allow_plan: self.allow_plan,
            allow_merge: self.allow_merge,
        })
    }
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;

    let repo = absolute(args.repo.as_deref().unwrap_or(root))?;
    let spec_dir = match &args.spec_dir {
        Some(dir) => absolute(dir)?,
        None => repo.join("specs").join(&args.feature_id),
    };
    let worktree_path = args.worktree_path.as_deref().map(absolute).transpose()?;

    let request = RunRequest {
        feature_id: args.feature_id.clone(),
        repository_path: repo,
        spec_dir,
        worktree_path,
        approval_gates: args.gates(),
        push: args.push,
        open_pr: args.open_pr,
    };

    let service = ws.run_service(args.foreground)?;
    let outcome = runtime()?
        .block_on(service.submit(request))
        .with_context(|| format!("failed to start run for '{}'", args.feature_id))?;
    report(&outcome, json)
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("cannot read current directory")?
        .join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        Harness::parse_from(std::iter::once("shep").chain(args.iter().copied())).run
    }

    #[test]
    fn default_gates_are_all_closed() {
        let args = parse(&["auth"]);
        assert_eq!(args.gates(), Some(ApprovalGates::default()));
    }

    #[test]
    fn allow_flags_open_individual_gates() {
        let gates = parse(&["auth", "--allow-prd", "--allow-merge"]).gates().unwrap();
        assert!(gates.allow_prd && gates.allow_merge);
        assert!(!gates.allow_plan);
    }

    #[test]
    fn no_gates_means_none() {
        assert_eq!(parse(&["auth", "--no-gates"]).gates(), None);
    }

    #[test]
    fn no_gates_conflicts_with_allow_flags() {
        let res = Harness::try_parse_from(["shep", "auth", "--no-gates", "--allow-plan"]);
        assert!(res.is_err());
    }
}
