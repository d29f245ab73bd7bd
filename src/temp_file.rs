//! Scoped scratch file that is either promoted onto its destination or removed.

use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::adapters::local::create_dir_all;

/// A uniquely named temp file next to its eventual destination.
///
/// The guard is finalized by exactly one of [`save`](TempFile::save) or
/// [`cleanup`](TempFile::cleanup); after that both are no-ops, so callers can
/// invoke them unconditionally. A guard dropped without being finalized
/// removes its file, which covers cancelled futures and panics.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    file: Option<File>,
    finalized: bool,
}

impl TempFile {
    /// Create a temp file for `dest`, named `<dest name>-<uuid>.tmp` in the same directory.
    ///
    /// Living in the destination's directory keeps the final rename on one filesystem.
    pub async fn create(dest: &Path) -> Result<Self> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let name = dest.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let path = dir.join(format!("{}-{}.tmp", name, uuid::Uuid::new_v4()));

        create_dir_all(dir).await?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path).await?;

        tracing::trace!(path = %path.display(), "Created temp file");

        Ok(Self {
            path,
            file: Some(file),
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The open handle, for writing. `None` once finalized.
    pub fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    /// Flush, sync and close the file, then rename it onto `dest`.
    ///
    /// The rename replaces any existing file at `dest` atomically. If any
    /// step fails the guard stays unfinalized, so a later `cleanup` still
    /// removes the temp file.
    pub async fn save(&mut self, dest: &Path) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&self.path, dest).await?;
        self.finalized = true;
        tracing::debug!(from = %self.path.display(), to = %dest.display(), "Promoted temp file");
        Ok(())
    }

    /// Close and remove the temp file.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.file = None;
        self.finalized = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.file = None;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}
