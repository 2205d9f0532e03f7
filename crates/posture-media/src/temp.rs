//! Temporary file tracking and bulk cleanup.
//!
//! Every path handed out by [`TempFileManager`] is tracked until it is
//! cleaned up. Dropping the manager removes whatever is still tracked, so a
//! manager owned by a scope releases its files on every exit path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MediaResult;

/// Name of the default base directory under the OS temp root.
pub const DEFAULT_TEMP_DIR_NAME: &str = "pose-est";

/// Allocates unique temp paths and removes them on request or on drop.
#[derive(Debug)]
pub struct TempFileManager {
    base_dir: PathBuf,
    tracked: Mutex<HashSet<PathBuf>>,
}

impl TempFileManager {
    /// Manager rooted at `<os temp>/pose-est`.
    pub fn new() -> MediaResult<Self> {
        Self::with_base_dir(std::env::temp_dir().join(DEFAULT_TEMP_DIR_NAME))
    }

    /// Manager rooted at `base_dir`, created if absent.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> MediaResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        debug!(base_dir = %base_dir.display(), "Temp file manager initialized");

        Ok(Self {
            base_dir,
            tracked: Mutex::new(HashSet::new()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Allocate a fresh path ending in `suffix` (e.g. `".mp4"`).
    ///
    /// Only the path is reserved; no file is created.
    pub fn create_temp_path(&self, suffix: &str) -> PathBuf {
        let path = self.base_dir.join(format!("{}{}", Uuid::new_v4(), suffix));
        self.lock().insert(path.clone());
        debug!(path = %path.display(), "Created temp path");
        path
    }

    /// Delete `path` and stop tracking it.
    ///
    /// Returns true only when a file was actually removed, so a second call
    /// for the same path returns false.
    pub fn cleanup(&self, path: &Path) -> bool {
        let deleted = match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted temp file");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete temp file");
                false
            }
        };

        self.lock().remove(path);
        deleted
    }

    /// Delete every tracked path, returning how many files were removed.
    ///
    /// A file that cannot be removed is logged and skipped.
    pub fn cleanup_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.lock().iter().cloned().collect();
        let count = paths.iter().filter(|p| self.cleanup(p)).count();

        if !paths.is_empty() {
            info!(removed = count, tracked = paths.len(), "Cleaned up temp files");
        }
        count
    }

    /// Number of paths currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        // The set stays consistent even if a holder panicked
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}
