use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AgentRunRecord, AgentRunStatus};
use crate::config::HealthConfig;

/// Display-only liveness heuristic derived from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunHealth {
    Healthy,
    Stuck,
    Crashed,
}

impl RunHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            RunHealth::Healthy => "healthy",
            RunHealth::Stuck => "stuck",
            RunHealth::Crashed => "crashed",
        }
    }
}

impl fmt::Display for RunHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunHealthThresholds {
    pub stuck_after: Duration,
    pub crashed_after: Duration,
}

impl From<&HealthConfig> for RunHealthThresholds {
    fn from(cfg: &HealthConfig) -> Self {
        Self {
            stuck_after: Duration::from_secs(cfg.stuck_after_seconds),
            crashed_after: Duration::from_secs(cfg.crashed_after_seconds),
        }
    }
}

impl RunHealthThresholds {
    /// Only runs with a live worker have a health; everything else is `None`.
    pub fn assess(&self, run: &AgentRunRecord, now: DateTime<Utc>) -> Option<RunHealth> {
        if run.status != AgentRunStatus::Running {
            return None;
        }
        let last = run.last_heartbeat.or(run.started_at)?;
        let age = (now - last).to_std().unwrap_or_default();
        Some(if age >= self.crashed_after {
            RunHealth::Crashed
        } else if age >= self.stuck_after {
            RunHealth::Stuck
        } else {
            RunHealth::Healthy
        })
    }
}
