//! Atomic file writes: write to a sibling temp file, then rename.
//!
//! Used by the disk cache tier so a reader can never observe a partially
//! written blob — the rename is the commit point.

use re_core::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Write `content` to `path` atomically, creating parent directories as
/// needed. On any failure the temporary file is removed and `path` is left
/// untouched.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), Error> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::invalid_argument(format!("{path:?} has no parent directory")))?;

    fs::create_dir_all(parent).map_err(|e| Error::io("create parent directory", parent, e))?;

    let temp_path = sibling_temp_path(path);

    let result = (|| -> Result<(), Error> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::io("create temporary file", &temp_path, e))?;
        file.write_all(content)
            .map_err(|e| Error::io("write temporary file", &temp_path, e))?;
        file.sync_all()
            .map_err(|e| Error::io("sync temporary file", &temp_path, e))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io("atomic rename", path, e)
    })
}

/// The path of the temp file `write_atomic` would use for `path`: same
/// directory (so the final rename is on the same filesystem), suffixed with
/// a random component so concurrent writers never collide.
pub fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.{}.tmp", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.blob");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn no_temp_file_left_behind_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.blob");
        write_atomic(&path, b"hi").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
