//! Prompt builders. Pure functions of the state; the wording is opaque to
//! the engine, but every prompt starts with a `# <Title>` headline.

use std::fmt::Write as _;

use super::{Node, WorkflowState};
use crate::git::{DiffSummary, PrInfo};

fn header(out: &mut String, title: &str, state: &WorkflowState) {
    let _ = writeln!(out, "# {title}: {}", state.feature_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "Repository: {}", state.repository_path.display());
    let _ = writeln!(out, "Working directory: {}", state.work_dir().display());
    let _ = writeln!(out, "Spec directory: {}", state.spec_dir.display());
    let _ = writeln!(out);
}

fn feedback(out: &mut String, state: &WorkflowState) {
    if !state.needs_reexecution {
        return;
    }
    if let Some(fb) = state.rejection_feedback.as_deref() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "## Reviewer feedback (iteration {})",
            state.rejection_iteration
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "The previous output was rejected. Address this feedback:");
        let _ = writeln!(out, "{fb}");
    }
}

/// Prompt for one of the five agent phases.
pub fn phase_prompt(node: Node, state: &WorkflowState) -> String {
    let mut out = String::new();
    let (title, body) = match node {
        Node::Analyze => (
            "Analyze",
            "Read the feature description in the spec directory and the relevant parts of \
             the codebase. Write `analysis.md` in the spec directory summarising scope, \
             affected modules and risks.",
        ),
        Node::Requirements => (
            "Requirements",
            "Using `analysis.md`, write `spec.md` in the spec directory: user-facing \
             requirements, acceptance criteria and explicit non-goals.",
        ),
        Node::Research => (
            "Research",
            "Investigate libraries, APIs and existing patterns needed to satisfy `spec.md`. \
             Record findings and decisions in `research.md`.",
        ),
        Node::Plan => (
            "Plan",
            "Write `plan.md` and `tasks.md`: an ordered implementation plan with small, \
             independently verifiable tasks.",
        ),
        Node::Implement => (
            "Implement",
            "Implement every task in `tasks.md` in the working directory. Run the project's \
             tests and fix failures before finishing.",
        ),
        Node::Merge | Node::CiFix => ("Continue", "Continue the feature workflow."),
    };
    header(&mut out, title, state);
    out.push_str(body);
    out.push('\n');
    feedback(&mut out, state);
    out
}

/// First merge step: commit, and optionally push and open a PR.
pub fn commit_prompt(
    state: &WorkflowState,
    branch: &str,
    base: &str,
    diff: Option<&DiffSummary>,
) -> String {
    let mut out = String::new();
    header(&mut out, "Commit", state);
    let _ = writeln!(out, "Commit all changes on branch `{branch}` with a descriptive message.");
    if state.pushes_branch() {
        let _ = writeln!(out, "Push `{branch}` to the remote.");
    }
    if state.open_pr {
        let _ = writeln!(
            out,
            "Open a pull request from `{branch}` into `{base}` unless one already exists."
        );
    }
    if let Some(diff) = diff {
        let _ = writeln!(out);
        let _ = writeln!(out, "Current diff against {base}: {}", diff.describe());
    }
    feedback(&mut out, state);
    out
}

/// Second merge step, after the merge gate.
pub fn merge_prompt(state: &WorkflowState, branch: &str, base: &str, pr: Option<&PrInfo>) -> String {
    let mut out = String::new();
    header(&mut out, "Merge", state);
    match pr {
        Some(pr) => {
            let _ = writeln!(out, "Merge pull request #{} ({}) with:", pr.number, pr.url);
            let _ = writeln!(out, "    gh pr merge {} --squash", pr.number);
        }
        None => {
            let _ = writeln!(out, "Squash-merge `{branch}` into `{base}` locally with:");
            let _ = writeln!(out, "    git checkout {base} && git merge --squash {branch}");
            let _ = writeln!(out, "then commit the result.");
        }
    }
    let _ = writeln!(out, "Resolve any conflicts; do not force-push.");
    out
}

pub fn ci_fix_prompt(
    state: &WorkflowState,
    branch: &str,
    failure: &str,
    attempt: u32,
    max_attempts: u32,
) -> String {
    let mut out = String::new();
    header(&mut out, "Fix CI", state);
    let _ = writeln!(
        out,
        "CI failed on `{branch}` (fix attempt {attempt} of {max_attempts})."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Failure summary:");
    let _ = writeln!(out, "{failure}");
    let _ = writeln!(out);
    let _ = writeln!(out, "Fix the cause, commit, and push to `{branch}`.");
    out
}
