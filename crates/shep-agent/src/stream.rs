use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::process::AgentProcess;
use crate::types::{AgentOptions, StreamLine};
use crate::Result;

// ─── AgentStream ──────────────────────────────────────────────────────────

/// Lines from one agent subprocess, ending after the `result` line or when
/// the process exits. Dropping the stream stops the reader task, which kills
/// the subprocess.
pub struct AgentStream {
    rx: mpsc::Receiver<Result<StreamLine>>,
}

impl AgentStream {
    pub(crate) fn spawn(prompt: String, opts: AgentOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            match AgentProcess::start(&prompt, &opts).await {
                Ok(process) => pump(process, tx).await,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        Self { rx }
    }

    #[cfg(test)]
    pub(crate) fn from_process(process: AgentProcess) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump(process, tx));
        Self { rx }
    }

    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<StreamLine>>) -> Self {
        Self { rx }
    }
}

async fn pump(mut process: AgentProcess, tx: mpsc::Sender<Result<StreamLine>>) {
    let mut saw_result = false;
    loop {
        match process.next_line().await {
            Ok(Some(line)) => {
                let last = matches!(line, StreamLine::Result(_));
                saw_result |= last;
                if tx.send(Ok(line)).await.is_err() || last {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    if !saw_result {
        if let Some(e) = process.exit_error().await {
            let _ = tx.send(Err(e)).await;
        }
    }
    process.kill().await;
}

impl Stream for AgentStream {
    type Item = Result<StreamLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
