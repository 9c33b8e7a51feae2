//! `shep-agent` drives the Claude CLI as a subprocess over its
//! `--output-format stream-json` protocol.
//!
//! ```text
//! AgentOptions ─▶ AgentProcess ─▶ AgentStream ─▶ run() / RunOutcome
//!                 (claude …)      (StreamLine)
//! ```
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use shep_agent::{query, AgentOptions, StreamLine};
//!
//! let mut lines = query("summarise README.md", AgentOptions::default());
//! while let Some(line) = lines.next().await {
//!     if let StreamLine::Result(r) = line? {
//!         println!("{}", r.result.unwrap_or_default());
//!     }
//! }
//! ```

pub mod error;
pub mod runner;
pub mod stream;
pub mod types;

pub(crate) mod process;

pub use error::AgentError;
pub use runner::{run, RunOutcome};
pub use stream::AgentStream;
pub use types::{
    AgentOptions, AssistantLine, Block, PermissionMode, ResultLine, StreamLine, SystemLine, Usage,
};

pub type Result<T> = std::result::Result<T, AgentError>;

/// Start `prompt` in a new agent subprocess and stream its lines. Must be
/// called inside a tokio runtime.
pub fn query(prompt: impl Into<String>, opts: AgentOptions) -> AgentStream {
    AgentStream::spawn(prompt.into(), opts)
}
