use thiserror::Error;

use crate::git::GitPrError;

#[derive(Debug, Error)]
pub enum ShepError {
    #[error("not initialized: run 'shep init'")]
    NotInitialized,

    #[error("agent run not found: {0}")]
    RunNotFound(String),

    #[error("invalid feature id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidFeatureId(String),

    #[error("cannot {action} run {run_id} while it is {status}")]
    InvalidRunState {
        run_id: String,
        status: String,
        action: String,
    },

    #[error("no checkpoint for thread {0}")]
    NoCheckpoint(String),

    #[error("thread {0} has no pending interrupt to resume")]
    NoPendingInterrupt(String),

    #[error("invalid resume payload: {0}")]
    InvalidResumePayload(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("executor timed out after {0}s")]
    ExecutorTimeout(u64),

    #[error(transparent)]
    GitPr(#[from] GitPrError),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShepError>;
