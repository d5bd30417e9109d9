//! File System Utilities with Enhanced Error Handling
//!
//! Directory creation, whole-file replacement and line appends used by the
//! shared-directory store, with I/O failures mapped onto [`FeedError`].

use crate::{FeedError, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Ensure a directory exists, creating it and its parents if necessary
///
/// # Errors
///
/// Returns `PermissionDenied` if creation fails due to permissions.
/// Returns `Io` for other filesystem errors.
pub async fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();

    if !dir.exists() {
        debug!("Creating directory: {}", dir.display());
        fs::create_dir_all(dir)
            .await
            .map_err(|e| FeedError::from_io_error(e, &format!("creating directory {}", dir.display())))?;
    }

    Ok(())
}

/// Ensure the parent directory of `file_path` exists
pub async fn ensure_parent_dir(file_path: impl AsRef<Path>) -> Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent).await,
        _ => Ok(()),
    }
}

/// Append one line to a file, creating it if missing
///
/// The line and its terminator go out in a single write so concurrent
/// appenders on the same file do not interleave within a line.
pub async fn append_line(path: impl AsRef<Path>, line: &str) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path).await?;

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| FeedError::from_io_error(e, &format!("opening {}", path.display())))?;

    file.write_all(&buf)
        .await
        .map_err(|e| FeedError::from_io_error(e, &format!("appending to {}", path.display())))?;
    file.flush().await?;

    Ok(())
}

/// Replace a file's contents atomically (write to a sibling, then rename)
pub async fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path).await?;

    let tmp = path.with_extension("tmp");
    if let Err(e) = fs::write(&tmp, data).await {
        cleanup_partial_file(&tmp).await;
        return Err(FeedError::from_io_error(e, &format!("writing {}", tmp.display())));
    }

    fs::rename(&tmp, path)
        .await
        .map_err(|e| FeedError::from_io_error(e, &format!("replacing {}", path.display())))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Read a file to a string, `None` when it does not exist
pub async fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FeedError::from_io_error(e, &format!("reading {}", path.display()))),
    }
}

/// Clean up a partially written file. Logs errors but doesn't fail.
pub async fn cleanup_partial_file(path: impl AsRef<Path>) {
    let path = path.as_ref();

    if path.exists() {
        if let Err(e) = fs::remove_file(path).await {
            warn!("Failed to clean up partial file {}: {}", path.display(), e);
        } else {
            debug!("Cleaned up partial file: {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_dir_creates_nested() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");

        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());

        // Second call is a no-op
        ensure_dir(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_line_creates_and_appends() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("feed").join("log.jsonl");

        append_line(&file, "one").await.unwrap();
        append_line(&file, "two").await.unwrap();

        let contents = fs::read_to_string(&file).await.unwrap();
        assert_eq!(contents, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_write_atomic_replaces() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("profile.json");

        write_atomic(&file, b"first").await.unwrap();
        write_atomic(&file, b"second").await.unwrap();

        assert_eq!(read_optional(&file).await.unwrap().as_deref(), Some("second"));
        assert!(!file.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_read_optional_missing() {
        let temp = TempDir::new().unwrap();
        assert!(read_optional(temp.path().join("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_nonexistent_file() {
        let temp = TempDir::new().unwrap();
        // Should not panic
        cleanup_partial_file(temp.path().join("nonexistent.tmp")).await;
    }
}
