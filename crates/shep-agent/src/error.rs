use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stream-json line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("agent process error: {0}")]
    Process(String),

    #[error("agent stream ended without a result message")]
    NoResult,

    #[error("agent run ended with {subtype}{}", format_errors(.errors))]
    Failed { subtype: String, errors: Vec<String> },
}

fn format_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(": {}", errors.join("; "))
    }
}
