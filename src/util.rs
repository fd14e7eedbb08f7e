use std::io::Write;
use std::path::{Path, PathBuf};

/// Default data directory: `~/.dmflow`.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dmflow"))
}

/// Write `content` to `path` via a sibling temp file and rename.
///
/// Readers in other processes see either the old document or the new one,
/// never a torn write.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// First whitespace-separated word of a name, or the whole trimmed name.
pub fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

/// Pluralize a count with a trailing "s": `plural(1, "follow-up")` -> "1 follow-up".
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
