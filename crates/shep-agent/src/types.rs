use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

// ─── Stream lines ─────────────────────────────────────────────────────────

/// The subset of `claude --output-format stream-json` lines a feature agent
/// cares about. Lines with any other `"type"` are skipped by the reader.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamLine {
    System(SystemLine),
    Assistant(AssistantLine),
    User(UserLine),
    Result(ResultLine),
}

impl StreamLine {
    pub fn session_id(&self) -> &str {
        match self {
            StreamLine::System(l) => &l.session_id,
            StreamLine::Assistant(l) => &l.session_id,
            StreamLine::User(l) => &l.session_id,
            StreamLine::Result(l) => &l.session_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemLine {
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantLine {
    pub session_id: String,
    pub message: AssistantBody,
}

impl AssistantLine {
    /// Concatenated text blocks, if any.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .message
            .content
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.message.content.iter().filter_map(|b| match b {
            Block::ToolUse { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantBody {
    #[serde(default)]
    pub content: Vec<Block>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Tool results fed back to the model. Only the session is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct UserLine {
    pub session_id: String,
}

/// The terminal line of every run. `subtype` is `success` or one of the
/// `error_*` variants.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultLine {
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ResultLine {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

// ─── AgentOptions ─────────────────────────────────────────────────────────

/// How to launch one agent subprocess.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Defaults to `claude` on `PATH`.
    pub executable: Option<PathBuf>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub cwd: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    pub append_system_prompt: Option<String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    /// Feature agents edit, commit and push unattended.
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_init_ignoring_extra_fields() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s1","model":"m","tools":[],"cwd":"/tmp"}"#;
        let parsed: StreamLine = serde_json::from_str(line).unwrap();
        match parsed {
            StreamLine::System(s) => {
                assert_eq!(s.subtype, "init");
                assert_eq!(s.model.as_deref(), Some("m"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assistant_text_and_tools() {
        let line = r#"{"type":"assistant","session_id":"s1","message":{"id":"x","role":"assistant","content":[
            {"type":"thinking","thinking":"hmm"},
            {"type":"text","text":"Reading the spec"},
            {"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"spec.md"}},
            {"type":"redacted_thinking","data":"..."}
        ]}}"#;
        let StreamLine::Assistant(a) = serde_json::from_str(line).unwrap() else {
            panic!("expected assistant");
        };
        assert_eq!(a.text().as_deref(), Some("Reading the spec"));
        assert_eq!(a.tool_names().collect::<Vec<_>>(), vec!["Read"]);
    }

    #[test]
    fn error_result_has_no_text() {
        let line = r#"{"type":"result","subtype":"error_max_turns","session_id":"s2","is_error":true,"num_turns":10,"total_cost_usd":0.5,"usage":{"input_tokens":5,"output_tokens":2},"errors":["turn limit"]}"#;
        let StreamLine::Result(r) = serde_json::from_str(line).unwrap() else {
            panic!("expected result");
        };
        assert!(!r.is_success());
        assert_eq!(r.result, None);
        assert_eq!(r.errors, vec!["turn limit"]);
        assert_eq!(r.usage.unwrap().input_tokens, 5);
    }
}
