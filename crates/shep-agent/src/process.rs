use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, trace};

use crate::types::{AgentOptions, StreamLine};
use crate::{AgentError, Result};

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// One `claude` subprocess speaking stream-json on both pipes.
///
/// The prompt goes in as a single user message on stdin, which is then
/// closed. Stdout is read line by line; stderr is buffered in the background
/// and attached to the error if the process exits non-zero.
pub(crate) struct AgentProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Arc<Mutex<String>>,
}

impl AgentProcess {
    pub(crate) async fn start(prompt: &str, opts: &AgentOptions) -> Result<Self> {
        let mut cmd = command(opts);
        // Allows launching from inside another agent session.
        cmd.env_remove("CLAUDECODE");
        cmd.envs(&opts.env);
        debug!(exe = %executable(opts).display(), "starting agent process");

        let mut process = Self::attach(cmd)?;
        process.send_prompt(prompt).await?;
        Ok(process)
    }

    #[cfg(test)]
    pub(crate) fn from_command(cmd: Command) -> Result<Self> {
        Self::attach(cmd)
    }

    fn attach(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;

        let stderr = Arc::new(Mutex::new(String::new()));
        if let Some(pipe) = child.stderr.take() {
            let sink = Arc::clone(&stderr);
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut buf) = sink.lock() {
                        if !buf.is_empty() {
                            buf.push('\n');
                        }
                        buf.push_str(&line);
                    }
                }
            });
        }

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
        })
    }

    async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        let mut stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Process("stdin not captured".into()))?;
        let message = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": prompt}]
            }
        });
        let mut buf = serde_json::to_vec(&message)
            .map_err(|e| AgentError::Process(format!("cannot encode prompt: {e}")))?;
        buf.push(b'\n');
        stdin.write_all(&buf).await?;
        stdin.flush().await?;
        // Dropping stdin closes it: single-turn mode.
        Ok(())
    }

    /// Next recognised line, or `None` at EOF. Blank lines and JSON objects
    /// with an unrecognised `"type"` are skipped.
    pub(crate) async fn next_line(&mut self) -> Result<Option<StreamLine>> {
        while let Some(raw) = self.lines.next_line().await? {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamLine>(line) {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(_) if has_type_field(line) => {
                    trace!(line, "skipping unhandled stream line");
                }
                Err(source) => {
                    return Err(AgentError::Parse {
                        line: line.to_owned(),
                        source,
                    })
                }
            }
        }
        Ok(None)
    }

    /// Wait for exit; a non-zero status becomes an error carrying stderr.
    pub(crate) async fn exit_error(&mut self) -> Option<AgentError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(AgentError::Io(e)),
        };
        if status.success() {
            return None;
        }
        let how = match status.code() {
            Some(code) => format!("agent exited with code {code}"),
            None => "agent terminated by signal".to_string(),
        };
        let stderr = self.stderr.lock().map(|b| b.clone()).unwrap_or_default();
        Some(AgentError::Process(if stderr.is_empty() {
            how
        } else {
            format!("{how}\nstderr: {stderr}")
        }))
    }

    pub(crate) async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            trace!(error = %e, "agent process already gone");
        }
    }
}

/// Valid JSON with a `"type"` key is a line type we don't model, not a
/// protocol error.
fn has_type_field(line: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(line)
        .map(|v| v.get("type").is_some())
        .unwrap_or(false)
}

// ─── Command line ─────────────────────────────────────────────────────────

fn executable(opts: &AgentOptions) -> &Path {
    opts.executable.as_deref().unwrap_or(Path::new("claude"))
}

fn command(opts: &AgentOptions) -> Command {
    let mut cmd = Command::new(executable(opts));
    cmd.args([
        "--print",
        "--verbose",
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
    ]);
    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }
    if let Some(turns) = opts.max_turns {
        cmd.arg("--max-turns").arg(turns.to_string());
    }
    if opts.permission_mode != Default::default() {
        cmd.arg("--permission-mode").arg(opts.permission_mode.as_str());
    }
    if let Some(extra) = &opts.append_system_prompt {
        cmd.arg("--append-system-prompt").arg(extra);
    }
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}
