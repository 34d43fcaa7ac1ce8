//! Filesystem utilities for atomic operations.

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DododError, Result};

/// Atomically rename a file, with fallback for platforms where rename fails if target exists.
///
/// On some platforms (notably Windows), `fs::rename` fails if the destination already exists.
/// This function handles that case by removing the destination first and retrying.
///
/// If the rename ultimately fails, the temp file is cleaned up.
///
/// # Errors
///
/// Returns an error if the rename fails even after the fallback attempt.
pub fn rename_with_fallback(temp_path: &Path, destination: &Path) -> io::Result<()> {
    if let Err(initial_err) = fs::rename(temp_path, destination) {
        // Best-effort replace on platforms where rename fails if target exists.
        let _ = fs::remove_file(destination);
        fs::rename(temp_path, destination).map_err(|retry_err| {
            let _ = fs::remove_file(temp_path);
            io::Error::new(
                retry_err.kind(),
                format!(
                    "Atomic rename failed (initial: {}, retry: {})",
                    initial_err, retry_err
                ),
            )
        })?;
    }
    Ok(())
}

/// Write `data` to `path` through a synced temp file in the same directory.
///
/// Readers observe either the previous content or the new content, never a
/// torn write. On unix the file is created with owner-only permissions.
///
/// # Errors
///
/// Returns `Storage` if the parent directory is unusable or any write step fails.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DododError::Storage("Invalid target path".to_string()))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| DododError::Storage(format!("System time error: {}", e)))?
        .as_nanos();
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| DododError::Storage("Invalid target filename".to_string()))?;
    let temp_path = parent.join(format!("{}.{}.tmp", filename, nanos));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o700);
    }

    let mut file = options
        .open(&temp_path)
        .map_err(|e| DododError::Storage(format!("Temp file create failed: {}", e)))?;
    file.write_all(data)
        .map_err(|e| DododError::Storage(format!("Temp file write failed: {}", e)))?;
    file.sync_all()
        .map_err(|e| DododError::Storage(format!("Temp file sync failed: {}", e)))?;

    rename_with_fallback(&temp_path, path)
        .map_err(|e| DododError::Storage(format!("Atomic rename failed: {}", e)))?;

    Ok(())
}

/// Copy `source` to `destination` atomically, replacing any earlier copy.
pub fn backup_file(source: &Path, destination: &Path) -> Result<()> {
    let data = fs::read(source)?;
    write_atomic(destination, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_rename_new_file() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("temp.txt");
        let dest = dir.path().join("dest.txt");

        File::create(&temp).unwrap().write_all(b"test").unwrap();

        rename_with_fallback(&temp, &dest).unwrap();

        assert!(!temp.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "test");
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dodod.json");

        write_atomic(&dest, b"old").unwrap();
        write_atomic(&dest, b"new").unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_write_atomic_missing_parent_fails() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("missing").join("file");
        assert!(write_atomic(&dest, b"x").is_err());
    }

    #[test]
    fn test_backup_file_copies() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dodod.json");
        let dst = dir.path().join("database.dodod.json.backup");
        fs::write(&src, b"{}").unwrap();

        backup_file(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"{}");
    }
}
