use std::path::{Path, PathBuf};

use crate::models::transfer::UserId;

const THUMBNAIL_EXTENSION: &str = "jpg";

/// Layout of the scratch area shared by all transfers.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-user directory holding that user's in-flight downloads.
    pub fn user_dir(&self, user: UserId) -> PathBuf {
        self.root.join(user.to_string())
    }

    /// The user's custom thumbnail. Kept across transfers.
    pub fn thumbnail(&self, user: UserId) -> PathBuf {
        self.root.join(format!("{}.{}", user, THUMBNAIL_EXTENSION))
    }

    /// Drops every per-user directory left by an earlier run. Downloads open
    /// their destination exclusively, so a stale partial file would block
    /// the same request forever. Thumbnails live in the root and are kept.
    pub async fn clear_downloads(&self) -> std::io::Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tracing::info!("[cleanup] removing stale {}", entry.path().display());
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        Ok(())
    }
}

/// Removes a file, treating "already gone" as success.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("[cleanup] could not remove {}: {}", path.display(), e),
    }
}
