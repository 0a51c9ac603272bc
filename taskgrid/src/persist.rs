//! Crash-safe file replacement shared by the file-backed adapters.

use std::io::Write;
use std::path::Path;

/// Replaces `path` with `bytes` through a synced temp file in the same
/// directory, creating parent directories as needed.
///
/// Readers see either the old contents or the new ones, never a torn write.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
