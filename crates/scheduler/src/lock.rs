//! Single-worker guard
//!
//! The scheduler may run in one process per deployment. The worker that
//! starts it creates the lock file exclusively; the file is removed when the
//! guard drops. A lock left behind by a crashed worker must be removed by hand.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Held for as long as this process is the scheduling worker
#[derive(Debug)]
pub struct WorkerLock {
    path: Option<PathBuf>,
}

impl WorkerLock {
    /// Take the lock; `None` disables the cross-process check
    pub fn acquire(path: Option<&Path>) -> SchedulerResult<Self> {
        let Some(path) = path else {
            return Ok(Self { path: None });
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SchedulerError::AlreadyRunning(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Worker lock acquired");

        Ok(Self {
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for WorkerLock {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Could not remove worker lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_worker_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.lock");

        let first = WorkerLock::acquire(Some(&path)).unwrap();
        assert!(path.exists());

        let second = WorkerLock::acquire(Some(&path)).unwrap_err();
        assert!(second.is_already_running());

        drop(first);
        assert!(!path.exists());
        assert!(WorkerLock::acquire(Some(&path)).is_ok());
    }

    #[test]
    fn test_no_path_is_unguarded() {
        let lock = WorkerLock::acquire(None).unwrap();
        assert!(lock.path().is_none());
    }
}
