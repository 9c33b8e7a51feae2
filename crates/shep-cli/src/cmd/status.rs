use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shep_core::observe::{ExecutionStep, ExecutionStepStore, PhaseTiming, PhaseTimingStore};
use shep_core::run::{AgentRunRecord, RunHealth, RunRepository};

use crate::output::{print_json, print_table};
use crate::workspace::Workspace;

#[derive(Serialize)]
struct RunView<'a> {
    #[serde(flatten)]
    run: &'a AgentRunRecord,
    health: Option<RunHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phases: Option<Vec<PhaseTiming>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<ExecutionStep>>,
}

pub fn run(root: &Path, run_id: Option<&str>, steps: bool, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;

    // Status is where dead workers get noticed.
    let service = ws.run_service(false)?;
    for id in service.sweep_crashed().context("crash sweep failed")? {
        eprintln!("note: worker for run {id} is gone; marked interrupted");
    }

    let health = ws.health();
    let now = Utc::now();

    let Some(run_id) = run_id else {
        let runs = ws.runs().list()?;
        if json {
            let views: Vec<RunView> = runs
                .iter()
                .map(|r| RunView {
                    run: r,
                    health: health.assess(r, now),
                    phases: None,
                    steps: None,
                })
                .collect();
            return print_json(&views);
        }
        if runs.is_empty() {
            println!("No runs yet. Start one with: shep run <feature-id>");
            return Ok(());
        }
        let rows: Vec<Vec<String>> = runs
            .iter()
            .map(|r| {
                vec![
                    r.id.clone(),
                    r.feature_id.clone(),
                    r.status.to_string(),
                    position(r),
                    health
                        .assess(r, now)
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "-".into()),
                    ago(r.updated_at, now),
                ]
            })
            .collect();
        print_table(&["RUN", "FEATURE", "STATUS", "NODE", "HEALTH", "UPDATED"], &rows);
        return Ok(());
    };

    let run = service.get(run_id)?;
    let (phases, step_log) = if steps {
        (
            Some(ws.timings().list_for_run(&run.id)?),
            Some(ws.steps().list_for_run(&run.id)?),
        )
    } else {
        (None, None)
    };
    let view = RunView {
        run: &run,
        health: health.assess(&run, now),
        phases,
        steps: step_log,
    };
    if json {
        return print_json(&view);
    }

    println!("Run:      {}", run.id);
    println!("Feature:  {}", run.feature_id);
    println!("Status:   {}", run.status);
    println!("Node:     {}", position(&run));
    if let Some(h) = view.health {
        println!("Health:   {h}");
    }
    if let Some(pid) = run.pid {
        println!("Worker:   pid {pid}");
    }
    if let Some(err) = &run.error {
        println!("Error:    {err}");
    }
    println!("Log:      {}", shep_core::paths::run_log_path(root, &run.id).display());

    if let Some(phases) = &view.phases {
        println!("\nPhases:");
        let rows: Vec<Vec<String>> = phases
            .iter()
            .map(|p| {
                vec![
                    p.phase.clone(),
                    p.started_at.format("%H:%M:%S").to_string(),
                    p.duration_ms
                        .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                        .unwrap_or_else(|| "running".into()),
                ]
            })
            .collect();
        print_table(&["PHASE", "STARTED", "DURATION"], &rows);
    }
    if let Some(steps) = &view.steps {
        println!("\nSteps:");
        let rows: Vec<Vec<String>> = steps
            .iter()
            .map(|s| {
                vec![
                    s.sequence.to_string(),
                    s.phase.clone(),
                    s.sub_step.clone().unwrap_or_default(),
                    s.event.as_str().to_string(),
                    s.detail.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["SEQ", "PHASE", "STEP", "EVENT", "DETAIL"], &rows);
    }
    Ok(())
}

fn position(run: &AgentRunRecord) -> String {
    if let Some(node) = run.waiting_at() {
        return format!("{node} (awaiting approval)");
    }
    run.last_node().unwrap_or("-").to_string()
}

fn ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ago_buckets() {
        let now = Utc::now();
        assert_eq!(ago(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(ago(now - Duration::seconds(125), now), "2m ago");
        assert_eq!(ago(now - Duration::hours(3), now), "3h ago");
        assert_eq!(ago(now + Duration::seconds(3), now), "0s ago");
    }
}
