use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `SHEP_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of the cwd containing `.shep/`
/// 3. Nearest ancestor containing `.git/`
/// 4. The cwd itself
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upwards(&cwd, ".shep")
        .or_else(|| find_upwards(&cwd, ".git"))
        .unwrap_or(cwd)
}

fn find_upwards(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_dir())
        .map(Path::to_path_buf)
}
