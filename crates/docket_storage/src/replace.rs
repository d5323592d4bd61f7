//! Whole-file replacement and removal.
//!
//! Rebuilt files follow a write-then-rename pattern:
//! 1. Write the new content under a temporary name
//! 2. Sync the temporary file
//! 3. Rename it over the target
//! 4. Fsync the directory so the rename itself is durable

use crate::error::StorageResult;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::debug;

/// Renames `temp` over `target` and syncs the containing directory.
///
/// The rename is atomic: readers see either the old or the new file.
///
/// # Errors
///
/// Returns an error if the rename or directory sync fails.
pub fn replace_file(temp: &Path, target: &Path) -> StorageResult<()> {
    fs::rename(temp, target)?;
    if let Some(parent) = target.parent() {
        sync_directory(parent)?;
    }
    debug!(from = %temp.display(), to = %target.display(), "replaced file");
    Ok(())
}

/// Writes `data` to `temp`, syncs it, then renames it over `target`.
///
/// # Errors
///
/// Returns an error if any step fails. The target is untouched unless
/// the final rename succeeded.
pub fn write_atomic(temp: &Path, target: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = File::create(temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    replace_file(temp, target)
}

/// Removes `path`, treating a missing file as success.
///
/// Returns whether a file was actually removed.
///
/// # Errors
///
/// Returns any error other than `NotFound`.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Syncs a directory so that creates, renames and deletes inside it are
/// durable.
///
/// NTFS journals metadata itself and does not support opening a
/// directory for fsync, so this is a no-op off Unix.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Syncs a directory so that creates, renames and deletes inside it are
/// durable.
///
/// NTFS journals metadata itself and does not support opening a
/// directory for fsync, so this is a no-op off Unix.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_target() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("data.tmp");
        let target = dir.path().join("data");

        write_atomic(&temp, &target, b"v1").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"v1");
        assert!(!temp.exists());
    }

    #[test]
    fn write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("data.tmp");
        let target = dir.path().join("data");
        fs::write(&target, b"old content").unwrap();

        write_atomic(&temp, &target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn replace_file_moves_content() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("a");
        let target = dir.path().join("b");
        fs::write(&temp, b"moved").unwrap();

        replace_file(&temp, &target).unwrap();

        assert!(!temp.exists());
        assert_eq!(fs::read(&target).unwrap(), b"moved");
    }

    #[test]
    fn remove_missing_is_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");

        assert!(!remove_if_exists(&path).unwrap());

        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
