//! Filesystem layout and tree operations.
//!
//! Staging: `<syncingPath>/<clientName>/<downloadID>/<relativePath>`.
//! Destination: `<downloadsPath>/<clientName>/<category>/<downloadName>`
//! unless the responsible app overrides the root.
//!
//! Promotion prefers an atomic rename; when staging and destination live
//! on different filesystems it falls back to copy-then-delete, guarded by
//! a destination-already-exists check.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Id;

/// Staging directory of one download
pub fn staging_dir(syncing_path: &Path, client_name: &str, download_id: Id) -> PathBuf {
    syncing_path
        .join(sanitize_segment(client_name))
        .join(download_id.to_string())
}

/// Destination directory of one download
///
/// `override_root` comes from the responsible app's `downloadsPath`; when
/// absent the default `<downloadsPath>/<clientName>/<category>` applies.
/// The download's display name is always the final segment.
pub fn destination_dir(
    downloads_path: &Path,
    override_root: Option<&Path>,
    client_name: &str,
    category: &str,
    download_name: &str,
) -> PathBuf {
    let root = match override_root {
        Some(root) if !root.as_os_str().is_empty() => root.to_path_buf(),
        _ => downloads_path
            .join(sanitize_segment(client_name))
            .join(sanitize_segment(category)),
    };
    root.join(sanitize_segment(download_name))
}

/// Make a display name safe as a single path segment
fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Move a tree from `source` to `destination`
///
/// Atomic rename on the same filesystem; otherwise copy-then-delete. The
/// destination must not exist — a populated destination means a previous
/// promotion already happened (or the operator put something there), and
/// silently merging would corrupt it.
pub async fn move_tree(source: &Path, destination: &Path) -> Result<()> {
    if tokio::fs::metadata(destination).await.is_ok() {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("destination already exists: {}", destination.display()),
        )));
    }
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                "cross-filesystem move, falling back to copy"
            );
            copy_tree(source, destination).await?;
            tokio::fs::remove_dir_all(source).await?;
            Ok(())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::CrossesDevices || e.raw_os_error() == Some(18)
}

/// Recursively copy a file or directory tree
fn copy_tree<'a>(
    source: &'a Path,
    destination: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::metadata(source).await?;

        if metadata.is_file() {
            tokio::fs::copy(source, destination).await?;
            return Ok(());
        }

        tokio::fs::create_dir_all(destination).await?;
        let mut entries = tokio::fs::read_dir(source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest_entry = destination.join(entry.file_name());
            copy_tree(&entry.path(), &dest_entry).await?;
        }
        Ok(())
    })
}

/// Remove a tree; a missing tree is fine
///
/// Returns whether anything was actually removed.
pub async fn remove_tree(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => {
            // A lone file (single-file staging leftovers) is still removable
            match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(true),
                Err(inner) if inner.kind() == ErrorKind::NotFound => Ok(false),
                Err(_) => Err(Error::Io(e)),
            }
        }
    }
}

/// Remove a directory if (and only if) it is empty; errors are ignored
pub async fn remove_if_empty(path: &Path) {
    tokio::fs::remove_dir(path).await.ok();
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_layout_is_client_then_download_id() {
        let id = Id::generate();
        let dir = staging_dir(Path::new("/staging"), "box1", id);
        assert_eq!(dir, PathBuf::from(format!("/staging/box1/{}", id)));
    }

    #[test]
    fn destination_defaults_to_client_and_category() {
        let dir = destination_dir(Path::new("/library"), None, "box1", "tv-sonarr", "Show S01");
        assert_eq!(dir, PathBuf::from("/library/box1/tv-sonarr/Show S01"));
    }

    #[test]
    fn destination_override_replaces_the_root_but_keeps_the_name() {
        let dir = destination_dir(
            Path::new("/library"),
            Some(Path::new("/mnt/tv")),
            "box1",
            "tv-sonarr",
            "Show S01",
        );
        assert_eq!(dir, PathBuf::from("/mnt/tv/Show S01"));
    }

    #[test]
    fn path_separators_in_names_cannot_escape_the_segment() {
        let dir = destination_dir(Path::new("/library"), None, "box1", "tv", "../../etc/passwd");
        assert_eq!(dir, PathBuf::from("/library/box1/tv/.._.._etc_passwd"));

        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment(""), "_");
    }

    #[tokio::test]
    async fn move_tree_renames_and_preserves_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("staging");
        tokio::fs::create_dir_all(source.join("Season 1")).await.unwrap();
        tokio::fs::write(source.join("Season 1/e01.mkv"), b"data").await.unwrap();

        let destination = dir.path().join("library").join("Show");
        move_tree(&source, &destination).await.unwrap();

        assert!(!source.exists(), "staging must be gone after the move");
        assert_eq!(
            tokio::fs::read(destination.join("Season 1/e01.mkv")).await.unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn move_tree_refuses_an_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("staging");
        let destination = dir.path().join("dest");
        tokio::fs::create_dir_all(&source).await.unwrap();
        tokio::fs::create_dir_all(&destination).await.unwrap();

        let err = move_tree(&source, &destination).await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "got {err}");
        assert!(source.exists(), "source must be untouched on abort");
    }

    #[tokio::test]
    async fn remove_tree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tree");
        tokio::fs::create_dir_all(target.join("sub")).await.unwrap();
        tokio::fs::write(target.join("sub/file"), b"x").await.unwrap();

        assert!(remove_tree(&target).await.unwrap());
        assert!(!target.exists());
        assert!(!remove_tree(&target).await.unwrap(), "second removal finds nothing");
    }

    #[tokio::test]
    async fn remove_tree_handles_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("single.mkv");
        tokio::fs::write(&file, b"x").await.unwrap();
        assert!(remove_tree(&file).await.unwrap());
        assert!(!file.exists());
    }
}
