use crate::error::{Result, ShepError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SHEP_DIR: &str = ".shep";
pub const LOGS_DIR: &str = ".shep/logs";

pub const CONFIG_FILE: &str = ".shep/config.yaml";
pub const DB_FILE: &str = ".shep/shep.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn shep_dir(root: &Path) -> PathBuf {
    root.join(SHEP_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(LOGS_DIR)
}

/// Worker stdout/stderr for a run land here.
pub fn run_log_path(root: &Path, run_id: &str) -> PathBuf {
    logs_dir(root).join(format!("{run_id}.log"))
}

pub fn is_initialized(root: &Path) -> bool {
    shep_dir(root).is_dir()
}

// ---------------------------------------------------------------------------
// Feature id validation
// ---------------------------------------------------------------------------

/// Feature ids become branch names and log file names, so they are held to
/// the same shape as a slug: lowercase ascii, digits and inner hyphens.
pub fn validate_feature_id(id: &str) -> Result<()> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if id.is_empty() || id.len() > 64 || !valid_chars || id.starts_with('-') || id.ends_with('-')
    {
        return Err(ShepError::InvalidFeatureId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_feature_ids() {
        for id in ["auth-login", "a", "my-feature-123", "x1"] {
            validate_feature_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_feature_ids() {
        for id in ["", "-starts-with-dash", "ends-with-dash-", "has spaces", "UPPER", "a_b"] {
            assert!(validate_feature_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn run_log_path_is_under_logs_dir() {
        let root = Path::new("/repo");
        let p = run_log_path(root, "abc");
        assert_eq!(p, PathBuf::from("/repo/.shep/logs/abc.log"));
    }
}
