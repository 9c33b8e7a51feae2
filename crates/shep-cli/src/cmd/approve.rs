use std::path::Path;

use anyhow::Context;

use super::{report, runtime};
use crate::workspace::Workspace;

pub fn run(root: &Path, run_id: &str, foreground: bool, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let service = ws.run_service(foreground)?;
    let outcome = runtime()?
        .block_on(service.approve(run_id))
        .with_context(|| format!("failed to approve run {run_id}"))?;
    report(&outcome, json)
}
