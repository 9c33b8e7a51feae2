use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use shep_agent::{AgentOptions, AgentStream, PermissionMode, RunOutcome, StreamLine};
use shep_core::config::ExecutorConfig;
use shep_core::executor::{
    with_timeout, ExecuteOptions, ExecuteResult, ExecutorEvent, ExecutorEventKind, ExecutorPort,
    TokenUsage,
};
use shep_core::{Result, ShepError};
use std::path::PathBuf;
use tracing::debug;

// ---------------------------------------------------------------------------
// ClaudeExecutor
// ---------------------------------------------------------------------------

/// [`ExecutorPort`] backed by the Claude CLI in stream-json mode.
pub struct ClaudeExecutor {
    executable: Option<PathBuf>,
}

impl ClaudeExecutor {
    pub fn new(cfg: &ExecutorConfig) -> Self {
        Self {
            executable: cfg.path_to_executable.clone(),
        }
    }

    fn agent_options(&self, options: &ExecuteOptions) -> AgentOptions {
        AgentOptions {
            executable: self.executable.clone(),
            model: options.model.clone(),
            max_turns: options.max_turns,
            cwd: options.cwd.clone(),
            permission_mode: PermissionMode::BypassPermissions,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutorPort for ClaudeExecutor {
    async fn execute(&self, prompt: &str, options: &ExecuteOptions) -> Result<ExecuteResult> {
        let opts = self.agent_options(options);
        debug!(cwd = ?opts.cwd, model = ?opts.model, "executing agent prompt");
        with_timeout(options.timeout, async move {
            shep_agent::run(prompt, opts)
                .await
                .map(into_result)
                .map_err(|e| ShepError::Executor(e.to_string()))
        })
        .await
    }

    fn execute_stream(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> BoxStream<'static, ExecutorEvent> {
        events(shep_agent::query(prompt, self.agent_options(options)))
    }
}

fn into_result(out: RunOutcome) -> ExecuteResult {
    ExecuteResult {
        result: out.text,
        session_id: Some(out.session_id),
        usage: out.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_cost_usd: Some(out.total_cost_usd),
        }),
        metadata: Some(serde_json::json!({ "num_turns": out.num_turns })),
    }
}

/// Progress for assistant text and tool use, then exactly one terminal
/// `result` or `error` event.
fn events(lines: AgentStream) -> BoxStream<'static, ExecutorEvent> {
    stream::unfold(Some(lines), |lines| async move {
        let mut lines = lines?;
        loop {
            let event = match lines.next().await {
                None => ExecutorEvent::new(
                    ExecutorEventKind::Error,
                    "agent stream ended without a result",
                ),
                Some(Err(e)) => ExecutorEvent::new(ExecutorEventKind::Error, e.to_string()),
                Some(Ok(StreamLine::Result(r))) if r.is_success() => ExecutorEvent::new(
                    ExecutorEventKind::Result,
                    r.result.unwrap_or_default(),
                ),
                Some(Ok(StreamLine::Result(r))) => ExecutorEvent::new(
                    ExecutorEventKind::Error,
                    format!("agent run ended with {}", r.subtype),
                ),
                Some(Ok(StreamLine::Assistant(a))) => {
                    let content = a.text().unwrap_or_else(|| {
                        a.tool_names()
                            .map(|t| format!("tool: {t}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    });
                    if content.is_empty() {
                        continue;
                    }
                    return Some((
                        ExecutorEvent::new(ExecutorEventKind::Progress, content),
                        Some(lines),
                    ));
                }
                Some(Ok(_)) => continue,
            };
            return Some((event, None));
        }
    })
    .boxed()
}
