//! File-based mutual exclusion for the working directory.
//!
//! Two orchestration runs mutating the same directory tree at once would
//! interleave their job chains and corrupt the point sets. [`DataLock`]
//! marks the tree as claimed with a lock file for the duration of an
//! `auto_run` call; dropping the guard removes the marker on every exit
//! path, including the fatal configuration-error path.

use log::{debug, warn};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors arising while acquiring the data lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another run already holds the lock
    #[error("data lock already held: {0}")]
    AlreadyLocked(PathBuf),
    /// Creating or removing the lock file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// RAII guard over the working-directory lock file.
#[derive(Debug)]
pub struct DataLock {
    path: PathBuf,
}

impl DataLock {
    /// Claim the lock, failing if the marker already exists.
    pub fn acquire(path: PathBuf) -> Result<Self, LockError> {
        if path.exists() {
            return Err(LockError::AlreadyLocked(path));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, std::process::id().to_string())?;
        debug!("acquired data lock at {}", path.display());
        Ok(Self { path })
    }

    /// Path of the lock marker.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for DataLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("failed to release data lock {}: {err}", self.path.display());
        } else {
            debug!("released data lock at {}", self.path.display());
        }
    }
}
