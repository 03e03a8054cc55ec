use crate::Error;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on the repository lock file.
///
/// Serializes mutating transactions across daemon instances; within one
/// daemon the mutation queue already runs tasks one at a time, so the lock's
/// job is defending against a second process. Held for the whole duration of
/// a task's plan and released on drop on every exit path.
pub struct RepoLock {
    lock_file: File,
}

impl RepoLock {
    /// Acquire without blocking. Fails with [`Error::RepoBusy`] when another
    /// holder owns the lock.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, Error> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("cannot create lock directory: {e}")))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| Error::Internal(format!("cannot open lock file: {e}")))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { lock_file: file }),
            Err(_) => Err(Error::RepoBusy),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}
