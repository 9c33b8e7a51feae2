use std::path::Path;

use anyhow::{bail, Context};

use super::{report, runtime};
use crate::workspace::Workspace;

pub fn run(
    root: &Path,
    run_id: &str,
    feedback: &str,
    foreground: bool,
    json: bool,
) -> anyhow::Result<()> {
    if feedback.trim().is_empty() {
        bail!("--feedback must not be empty");
    }
    let ws = Workspace::open(root)?;
    let service = ws.run_service(foreground)?;
    let outcome = runtime()?
        .block_on(service.reject(run_id, feedback))
        .with_context(|| format!("failed to reject run {run_id}"))?;
    report(&outcome, json)
}
