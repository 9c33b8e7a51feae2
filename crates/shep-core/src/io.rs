use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Replace `path` in one rename so a reader never sees a half-written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Make sure every entry has its own line in `root/.gitignore`. Returns the
/// entries that were missing.
pub fn ensure_gitignore_entries<'a>(root: &Path, entries: &[&'a str]) -> Result<Vec<&'a str>> {
    let path = root.join(".gitignore");
    let mut content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|e| !content.lines().any(|l| l.trim() == *e))
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in &missing {
        content.push_str(entry);
        content.push('\n');
    }
    atomic_write(&path, content.as_bytes())?;
    Ok(missing)
}
