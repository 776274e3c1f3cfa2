//! File helpers shared by the local index and the record log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sibling temp path used while rewriting `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `contents` via a synced temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(temp_path, path)?;
    Ok(())
}
