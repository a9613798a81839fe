use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Holder of temporary media artifacts (compressed uploads, trimmed clips,
/// downloaded previews) that a pull-to-refresh throws away.
#[async_trait]
pub trait ScratchCleaner: Send + Sync {
    /// Remove temporary artifacts, returning how many were removed.
    async fn clear_temporary(&self) -> std::io::Result<usize>;
}

/// No scratch storage to clean.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScratch;

#[async_trait]
impl ScratchCleaner for NoScratch {
    async fn clear_temporary(&self) -> std::io::Result<usize> {
        Ok(0)
    }
}

/// Scratch directory whose regular files are deleted on refresh.
///
/// Subdirectories and symlinks are left alone; a missing directory counts
/// as already clean.
#[derive(Debug, Clone)]
pub struct TempMediaDir {
    dir: PathBuf,
}

impl TempMediaDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ScratchCleaner for TempMediaDir {
    async fn clear_temporary(&self) -> std::io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                // Raced with another cleaner
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(dir = %self.dir.display(), removed = removed, "Cleared temporary media");
        Ok(removed)
    }
}
