//! Filesystem helpers shared by the dump and restore pipelines.
//!
//! Every job works in its own uniquely named temp subtree, so no locking
//! is needed between concurrent jobs.

use super::errors::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Timestamp used in generated file and directory names.
pub fn timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Short random token for collision-free names.
pub fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Create a private temp directory for one job under `base`.
///
/// The directory is removed when the returned handle is dropped, on every
/// exit path of the owning pipeline.
pub fn create_job_temp_dir(base: &Path, purpose: &str) -> Result<TempDir> {
    std::fs::create_dir_all(base)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("backup-engine-{}-{}-", purpose, timestamp_suffix()))
        .rand_bytes(8)
        .tempdir_in(base)?;
    debug!("Created job temp dir {}", dir.path().display());
    Ok(dir)
}

/// Copy a live file aside before it gets overwritten.
///
/// Returns the path of the byte-identical copy, or `None` when there is
/// nothing to protect.
pub fn copy_aside(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "data".to_string());
    let backup_name = format!("{}.{}-{}.bak", file_name, timestamp_suffix(), random_suffix());
    let backup_path = path.with_file_name(backup_name);

    let copied = std::fs::copy(path, &backup_path)?;
    let original = std::fs::metadata(path)?.len();
    if copied != original {
        let _ = std::fs::remove_file(&backup_path);
        return Err(super::EngineError::Integrity(format!(
            "Safety copy of {} is incomplete ({} of {} bytes)",
            path.display(),
            copied,
            original
        )));
    }

    Ok(Some(backup_path))
}

/// Replace `dest` with the contents of `src` via a sibling temp file and rename.
pub fn replace_file(src: &Path, dest: &Path) -> Result<u64> {
    let tmp = dest.with_file_name(format!(
        ".{}.restore-{}",
        dest.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        random_suffix()
    ));
    let bytes = std::fs::copy(src, &tmp)?;
    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(bytes)
}

/// Removes a partially written destination file unless committed.
pub struct DestinationGuard {
    path: PathBuf,
    committed: bool,
}

impl DestinationGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file; the guard no longer deletes it.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if self.committed || !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial file {}", self.path.display()),
            Err(e) => warn!("Failed to remove partial file {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_job_temp_dir_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let path = {
            let dir = create_job_temp_dir(base.path(), "dump").unwrap();
            assert!(dir.path().exists());
            let name = dir.path().file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("backup-engine-dump-"));
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_copy_aside_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app.db");
        std::fs::write(&live, b"live contents").unwrap();

        let copy = copy_aside(&live).unwrap().unwrap();
        assert_ne!(copy, live);
        assert_eq!(std::fs::read(&copy).unwrap(), b"live contents");
        assert!(copy.file_name().unwrap().to_string_lossy().starts_with("app.db."));

        assert!(copy_aside(&dir.path().join("missing.db")).unwrap().is_none());
    }

    #[test]
    fn test_destination_guard() {
        let dir = TempDir::new().unwrap();
        let dropped = dir.path().join("dropped.sql");
        let kept = dir.path().join("kept.sql");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        drop(DestinationGuard::new(&dropped));
        DestinationGuard::new(&kept).commit();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_replace_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.rdb");
        let dest = dir.path().join("dump.rdb");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dest, b"old").unwrap();

        assert_eq!(replace_file(&src, &dest).unwrap(), 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }
}
