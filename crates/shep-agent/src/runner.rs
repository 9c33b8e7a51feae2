use futures::StreamExt;

use crate::stream::AgentStream;
use crate::types::{AgentOptions, StreamLine, Usage};
use crate::{query, AgentError, Result};

/// The terminal outcome of a successful agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub session_id: String,
    pub text: String,
    pub num_turns: u32,
    pub total_cost_usd: f64,
    pub usage: Option<Usage>,
}

/// Run `prompt` to completion. Error result subtypes (`error_max_turns`,
/// `error_during_execution`, …) are returned as [`AgentError::Failed`].
pub async fn run(prompt: impl Into<String>, opts: AgentOptions) -> Result<RunOutcome> {
    collect(query(prompt, opts)).await
}

pub(crate) async fn collect(mut stream: AgentStream) -> Result<RunOutcome> {
    while let Some(line) = stream.next().await {
        let StreamLine::Result(r) = line? else {
            continue;
        };
        if !r.is_success() {
            return Err(AgentError::Failed {
                subtype: r.subtype,
                errors: r.errors,
            });
        }
        return Ok(RunOutcome {
            session_id: r.session_id,
            text: r.result.unwrap_or_default(),
            num_turns: r.num_turns,
            total_cost_usd: r.total_cost_usd,
            usage: r.usage,
        });
    }
    Err(AgentError::NoResult)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn parse(line: &str) -> Result<StreamLine> {
        Ok(serde_json::from_str(line).unwrap())
    }

    fn stream(lines: Vec<Result<StreamLine>>) -> AgentStream {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for l in lines {
            tx.try_send(l).unwrap();
        }
        AgentStream::from_channel(rx)
    }

    #[tokio::test]
    async fn success_returns_text_and_usage() {
        let out = collect(stream(vec![
            parse(r#"{"type":"system","subtype":"init","session_id":"s1"}"#),
            parse(r#"{"type":"result","subtype":"success","session_id":"s1","result":"plan written","num_turns":4,"total_cost_usd":0.25,"usage":{"input_tokens":10,"output_tokens":20}}"#),
        ]))
        .await
        .unwrap();
        assert_eq!(out.text, "plan written");
        assert_eq!(out.session_id, "s1");
        assert_eq!(out.num_turns, 4);
        assert_eq!(out.usage.unwrap().output_tokens, 20);
    }

    #[tokio::test]
    async fn error_subtype_is_failed() {
        let err = collect(stream(vec![parse(
            r#"{"type":"result","subtype":"error_max_turns","session_id":"s1","is_error":true,"errors":["hit 40 turns"]}"#,
        )]))
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("error_max_turns"));
        assert!(msg.contains("hit 40 turns"));
    }

    #[tokio::test]
    async fn missing_result_is_no_result() {
        let err = collect(stream(vec![])).await.unwrap_err();
        assert!(matches!(err, AgentError::NoResult));
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let err = collect(stream(vec![Err(AgentError::Process("boom".into()))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
