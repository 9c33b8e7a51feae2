use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitPrErrorCode {
    MergeConflict,
    AuthFailure,
    GhNotFound,
    CiTimeout,
    MergeFailed,
    GitError,
}

impl GitPrErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GitPrErrorCode::MergeConflict => "MERGE_CONFLICT",
            GitPrErrorCode::AuthFailure => "AUTH_FAILURE",
            GitPrErrorCode::GhNotFound => "GH_NOT_FOUND",
            GitPrErrorCode::CiTimeout => "CI_TIMEOUT",
            GitPrErrorCode::MergeFailed => "MERGE_FAILED",
            GitPrErrorCode::GitError => "GIT_ERROR",
        }
    }
}

impl fmt::Display for GitPrErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified git or GitHub failure. Never retried automatically.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct GitPrError {
    pub code: GitPrErrorCode,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GitPrError {
    pub fn new(code: GitPrErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Classify a failed command by the text it printed.
    pub fn from_output(context: &str, output: &str) -> Self {
        let code = classify(output);
        let detail = output.trim();
        let message = if detail.is_empty() {
            context.to_string()
        } else {
            format!("{context}: {detail}")
        };
        Self::new(code, message)
    }

    /// A command that could not be started at all.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            if program == "gh" {
                GitPrErrorCode::GhNotFound
            } else {
                GitPrErrorCode::GitError
            }
        } else {
            classify(&err.to_string())
        };
        Self::new(code, format!("failed to run {program}: {err}")).with_cause(err)
    }
}

const CONFLICT_MARKERS: &[&str] = &["conflict"];
const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "bad credentials",
    "gh auth login",
    "http 401",
    "http 403",
    "requires authentication",
];
const GH_MISSING_MARKERS: &[&str] = &["gh: command not found", "gh: not found", "enoent"];
const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout"];
const MERGE_FAILED_MARKERS: &[&str] = &[
    "not mergeable",
    "merge failed",
    "failed to merge",
    "cannot be merged",
];

/// Map command output to an error code by case-insensitive substring match.
/// Falls back to [`GitPrErrorCode::GitError`].
pub fn classify(output: &str) -> GitPrErrorCode {
    let lower = output.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if hit(CONFLICT_MARKERS) {
        GitPrErrorCode::MergeConflict
    } else if hit(AUTH_MARKERS) {
        GitPrErrorCode::AuthFailure
    } else if hit(GH_MISSING_MARKERS) {
        GitPrErrorCode::GhNotFound
    } else if hit(TIMEOUT_MARKERS) {
        GitPrErrorCode::CiTimeout
    } else if hit(MERGE_FAILED_MARKERS) {
        GitPrErrorCode::MergeFailed
    } else {
        GitPrErrorCode::GitError
    }
}
