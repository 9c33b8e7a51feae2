//! The port through which the graph talks to a coding agent.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShepError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub cwd: Option<PathBuf>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    /// Upper bound for the whole call. Enforced by the adapter.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub result: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorEventKind {
    Progress,
    Result,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorEvent {
    pub kind: ExecutorEventKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutorEvent {
    pub fn new(kind: ExecutorEventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorPort
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ExecutorPort: Send + Sync {
    /// Run one prompt to completion. Failures propagate unclassified.
    async fn execute(&self, prompt: &str, options: &ExecuteOptions) -> Result<ExecuteResult>;

    /// Run one prompt, yielding progress as it happens. The stream ends
    /// after a `Result` or `Error` event.
    fn execute_stream(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> BoxStream<'static, ExecutorEvent>;
}

/// Bound `fut` by `timeout` when one is set.
pub async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ShepError::ExecutorTimeout(limit.as_secs()))?,
    }
}

// ---------------------------------------------------------------------------
// MockExecutor
// ---------------------------------------------------------------------------

struct FailRule {
    needle: String,
    remaining: u32,
}

/// Deterministic executor: answers every prompt with a short canned summary
/// and records what it was asked. Used by `executor.backend: mock` and tests.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<String>>,
    fail_rules: Mutex<VecDeque<FailRule>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` prompts that contain `needle`.
    pub fn fail_when(self, needle: impl Into<String>, times: u32) -> Self {
        if let Ok(mut rules) = self.fail_rules.lock() {
            rules.push_back(FailRule {
                needle: needle.into(),
                remaining: times,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn should_fail(&self, prompt: &str) -> bool {
        let Ok(mut rules) = self.fail_rules.lock() else {
            return false;
        };
        for rule in rules.iter_mut() {
            if rule.remaining > 0 && prompt.contains(&rule.needle) {
                rule.remaining -= 1;
                return true;
            }
        }
        false
    }

    fn answer(prompt: &str) -> String {
        let headline = prompt
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim_start_matches('#')
            .trim();
        format!("done: {headline}")
    }
}

#[async_trait]
impl ExecutorPort for MockExecutor {
    async fn execute(&self, prompt: &str, _options: &ExecuteOptions) -> Result<ExecuteResult> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }
        if self.should_fail(prompt) {
            return Err(ShepError::Executor("mock executor failure".into()));
        }
        let n = self.call_count();
        Ok(ExecuteResult {
            result: Self::answer(prompt),
            session_id: Some(format!("mock-session-{n}")),
            usage: Some(TokenUsage {
                input_tokens: prompt.len() as u64,
                output_tokens: 16,
                total_cost_usd: None,
            }),
            metadata: None,
        })
    }

    fn execute_stream(
        &self,
        prompt: &str,
        _options: &ExecuteOptions,
    ) -> BoxStream<'static, ExecutorEvent> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }
        let last = if self.should_fail(prompt) {
            ExecutorEvent::new(ExecutorEventKind::Error, "mock executor failure")
        } else {
            ExecutorEvent::new(ExecutorEventKind::Result, Self::answer(prompt))
        };
        stream::iter(vec![
            ExecutorEvent::new(ExecutorEventKind::Progress, "working"),
            last,
        ])
        .boxed()
    }
}
