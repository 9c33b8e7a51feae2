pub mod approve;
pub mod init;
pub mod reject;
pub mod resume;
pub mod run;
pub mod status;
pub mod worker;

use anyhow::Context;
use shep_core::run::SubmitOutcome;
use shep_core::worker::WorkerExit;

use crate::output::print_json;

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start tokio runtime")
}

/// Print where a submitted, approved, rejected or resumed run ended up.
/// A foreground run that failed is an error.
pub(crate) fn report(outcome: &SubmitOutcome, json: bool) -> anyhow::Result<()> {
    if let Some(w) = &outcome.warning {
        eprintln!("warning: {w}");
    }
    let run = &outcome.run;
    if json {
        print_json(&serde_json::json!({
            "run_id": run.id,
            "thread_id": run.thread_id,
            "feature_id": run.feature_id,
            "status": run.status,
            "pid": outcome.pid,
            "waiting_at": run.waiting_at(),
            "error": run.error,
            "warning": outcome.warning,
        }))?;
    } else {
        match (&outcome.exit, outcome.pid) {
            (Some(WorkerExit::Completed), _) => {
                println!("Run {} completed.", run.id);
            }
            (Some(WorkerExit::WaitingApproval { node }), _) => {
                println!("Run {} is waiting for approval at '{node}'.", run.id);
                println!("  shep approve {}", run.id);
                println!("  shep reject {} --feedback \"...\"", run.id);
            }
            (Some(WorkerExit::Failed { error }), _) => {
                println!("Run {} failed: {error}", run.id);
            }
            (None, Some(pid)) => {
                println!("Run {} started (worker pid {pid}).", run.id);
                println!("  shep status {}", run.id);
            }
            (None, None) => println!("Run {}: {}", run.id, run.status),
        }
    }
    if let Some(WorkerExit::Failed { error }) = &outcome.exit {
        anyhow::bail!("run {} failed: {error}", run.id);
    }
    Ok(())
}
