//! Manifest file lifecycle: pickup -> processed | errors
//!
//! A manifest is moved exactly once per iteration in which it is observed.
//! The destination name is `<original_name>_<timestamp>` with a UTC
//! `YYYYMMDDTHHMMSS` stamp; if that name is already taken (two files with the
//! same name in the same second) a `_<n>` counter is appended.

use crate::config::DirsConfig;
use crate::error::FilesystemError;
use chrono::{DateTime, Utc};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Format of the execution timestamp appended to moved files
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Render the execution timestamp for `now`
pub fn execution_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Destination file name for `name` stamped with `timestamp`
///
/// Works on the raw OS name so a file whose name is not UTF-8 still moves.
pub fn stamped_name(name: &OsStr, timestamp: &str) -> OsString {
    let mut stamped = name.to_os_string();
    stamped.push("_");
    stamped.push(timestamp);
    stamped
}

/// Create the pickup, processed, errors and landing directories if missing
pub async fn ensure_layout(dirs: &DirsConfig) -> Result<(), FilesystemError> {
    for dir in [
        dirs.pickup_dir(),
        dirs.processed_dir(),
        dirs.errors_dir(),
        dirs.landing_dir.clone(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FilesystemError::CreateDir {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(dir = %dir.display(), "directory ready");
    }
    Ok(())
}

/// Move `path` into `target_dir` as `<name>_<timestamp>`, returning the new path
///
/// The rename is not retried. A cross-device or permission failure surfaces
/// as [`FilesystemError::MoveFailed`].
pub async fn move_to(
    path: &Path,
    target_dir: &Path,
    timestamp: &str,
) -> Result<PathBuf, FilesystemError> {
    let name = path.file_name().ok_or_else(|| FilesystemError::InvalidPath {
        path: path.to_path_buf(),
        reason: "path has no file name".to_string(),
    })?;

    let dest = free_destination(target_dir, &stamped_name(name, timestamp)).await;

    tracing::debug!(from = %path.display(), to = %dest.display(), "moving manifest");
    tokio::fs::rename(path, &dest)
        .await
        .map_err(|e| FilesystemError::MoveFailed {
            source_path: path.to_path_buf(),
            dest_path: dest.clone(),
            reason: e.to_string(),
        })?;

    Ok(dest)
}

async fn free_destination(target_dir: &Path, stamped: &OsStr) -> PathBuf {
    let first = target_dir.join(stamped);
    if !exists(&first).await {
        return first;
    }

    let mut counter = 1u32;
    loop {
        let mut name = stamped.to_os_string();
        name.push(format!("_{counter}"));
        let candidate = target_dir.join(name);
        if !exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
