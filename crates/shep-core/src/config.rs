use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorBackend {
    /// Spawn the Claude CLI in stream-json mode.
    Claude,
    /// Deterministic local executor; no agent is contacted.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_backend")]
    pub backend: ExecutorBackend,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Per agent call. `None` lets a call run until the agent exits.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub path_to_executable: Option<PathBuf>,
}

fn default_backend() -> ExecutorBackend {
    ExecutorBackend::Claude
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_max_turns() -> u32 {
    200
}

fn default_timeout_minutes() -> Option<u32> {
    Some(30)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            max_turns: default_max_turns(),
            timeout_minutes: default_timeout_minutes(),
            path_to_executable: None,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60))
    }
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_branch_prefix() -> String {
    "feat/".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

impl GitConfig {
    pub fn feature_branch(&self, feature_id: &str) -> String {
        format!("{}{}", self.branch_prefix, feature_id)
    }
}

// ---------------------------------------------------------------------------
// CiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_watch_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    15
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_max_attempts(),
            watch_timeout_seconds: default_watch_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl CiConfig {
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

// ---------------------------------------------------------------------------
// HealthConfig
// ---------------------------------------------------------------------------

/// Heartbeat age thresholds used only for status display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_stuck_after")]
    pub stuck_after_seconds: u64,
    #[serde(default = "default_crashed_after")]
    pub crashed_after_seconds: u64,
}

fn default_stuck_after() -> u64 {
    600
}

fn default_crashed_after() -> u64 {
    1800
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stuck_after_seconds: default_stuck_after(),
            crashed_after_seconds: default_crashed_after(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_rejection_warning")]
    pub rejection_warning_threshold: u32,
}

fn default_rejection_warning() -> u32 {
    5
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            rejection_warning_threshold: default_rejection_warning(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub ci: CiConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

impl Config {
    /// Load `.shep/config.yaml`, falling back to defaults when the file is
    /// absent. A present but malformed file is an error.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.ci.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "ci.max_attempts is 0: failing CI is never auto-fixed".to_string(),
            });
        }
        if self.ci.max_attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "ci.max_attempts={} (>10 is unusual)",
                    self.ci.max_attempts
                ),
            });
        }
        if self.ci.poll_interval_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ci.poll_interval_seconds must be greater than 0".to_string(),
            });
        }
        if self.ci.poll_interval_seconds > self.ci.watch_timeout_seconds {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "ci.poll_interval_seconds exceeds ci.watch_timeout_seconds".to_string(),
            });
        }
        if self.health.stuck_after_seconds >= self.health.crashed_after_seconds {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "health.stuck_after_seconds should be below crashed_after_seconds"
                    .to_string(),
            });
        }
        if self.git.base_branch.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "git.base_branch is empty".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
