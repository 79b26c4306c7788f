//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Advisory single-writer lock around store access."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::{Result, StoreError};

/// Exclusive advisory lock held for a whole load-mutate-save span.
///
/// The lock is released when the guard is dropped or the process exits.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock without blocking; contention fails with [`StoreError::Locked`].
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive().map_err(|err| {
            if err.kind() == fs2::lock_contended_error().kind() {
                StoreError::Locked(path.to_path_buf())
            } else {
                StoreError::Io(err)
            }
        })?;
        debug!(path = %path.display(), "store lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

/// [`StoreLock`] acquired on first use and kept until the handle is dropped.
///
/// Every operation of one agent goes through the same handle, so the lock is
/// taken once per process no matter how many operations run.
#[derive(Debug)]
pub struct LazyStoreLock {
    path: PathBuf,
    held: OnceCell<StoreLock>,
}

impl LazyStoreLock {
    /// Handle for the lock on `path`, not acquired yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: OnceCell::new(),
        }
    }

    /// Acquire the lock unless this handle already holds it.
    pub fn hold(&self) -> Result<&StoreLock> {
        self.held.get_or_try_init(|| StoreLock::acquire(&self.path))
    }

    /// Whether the lock has been acquired through this handle.
    pub fn is_held(&self) -> bool {
        self.held.get().is_some()
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
