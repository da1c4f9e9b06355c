use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive owner of a local staging file.
///
/// The file is removed when the guard is dropped, so every exit path of a
/// run releases it. Call [`StagingFile::cleanup`] to remove it explicitly and
/// learn whether the removal worked.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    released: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    AlreadyGone,
    Failed,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, CleanupOutcome::Failed)
    }
}

impl StagingFile {
    /// Take ownership of `path`. The file does not need to exist yet.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `to` and hand ownership to a new guard.
    /// On failure the current file is removed when `self` drops.
    pub fn persist_as(mut self, to: impl Into<PathBuf>) -> io::Result<StagingFile> {
        let to = to.into();
        fs::rename(&self.path, &to)?;
        self.released = true;
        Ok(StagingFile::adopt(to))
    }

    pub fn cleanup(mut self) -> CleanupOutcome {
        self.released = true;
        remove(&self.path)
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.released {
            remove(&self.path);
        }
    }
}

fn remove(path: &Path) -> CleanupOutcome {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("🧹 Removed staging file {}", path.display());
            CleanupOutcome::Removed
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupOutcome::AlreadyGone,
        Err(e) => {
            warn!("Failed to remove staging file {}: {}", path.display(), e);
            CleanupOutcome::Failed
        }
    }
}
