//! Per-key advisory locks
//!
//! Each key (a container or image name) maps to its own lock file, so
//! mutations on one key are serialized across threads and processes while
//! unrelated keys proceed in parallel.

use crate::error::{RamaError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A directory of lock files, one per key
#[derive(Debug, Clone)]
pub struct KeyLocks {
    dir: PathBuf,
}

/// Held lock on one key; released on drop
#[derive(Debug)]
pub struct KeyLock {
    _file: File,
    path: PathBuf,
}

impl KeyLocks {
    /// Create a lock directory
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    /// Block until the exclusive lock for `key` is held
    pub fn acquire(&self, key: &str) -> Result<KeyLock> {
        let file = self.open(key)?;
        file.lock_exclusive().map_err(|e| {
            RamaError::Lock(format!("Failed to lock {}: {}", self.lock_path(key).display(), e))
        })?;
        debug!(key, "acquired key lock");

        Ok(KeyLock {
            _file: file,
            path: self.lock_path(key),
        })
    }

    /// Block until a shared lock for `key` is held. Shared holders exclude
    /// exclusive holders but not each other.
    pub fn acquire_shared(&self, key: &str) -> Result<KeyLock> {
        let file = self.open(key)?;
        file.lock_shared().map_err(|e| {
            RamaError::Lock(format!("Failed to lock {}: {}", self.lock_path(key).display(), e))
        })?;

        Ok(KeyLock {
            _file: file,
            path: self.lock_path(key),
        })
    }

    /// Take the lock only if nobody else holds it
    #[cfg(test)]
    pub fn try_acquire(&self, key: &str) -> Result<Option<KeyLock>> {
        let file = self.open(key)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        Ok(Some(KeyLock {
            _file: file,
            path: self.lock_path(key),
        }))
    }

    fn open(&self, key: &str) -> Result<File> {
        // Lock files are never unlinked: removing a held lock file would let a
        // second process lock a fresh inode at the same path.
        let path = self.lock_path(key);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Ok(file)
    }
}

impl KeyLock {
    /// Path of the underlying lock file
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_exclusive_per_key() {
        let temp = tempdir().unwrap();
        let locks = KeyLocks::new(temp.path().join("locks")).unwrap();

        let held = locks.acquire("c1").unwrap();
        assert!(locks.try_acquire("c1").unwrap().is_none());
        assert!(locks.try_acquire("c2").unwrap().is_some());

        drop(held);
        assert!(locks.try_acquire("c1").unwrap().is_some());
    }

    #[test]
    fn test_shared_locks_exclude_writers_only() {
        let temp = tempdir().unwrap();
        let locks = KeyLocks::new(temp.path().to_path_buf()).unwrap();

        let reader = locks.acquire_shared("img").unwrap();
        let second = locks.acquire_shared("img").unwrap();
        assert!(locks.try_acquire("img").unwrap().is_none());

        drop(reader);
        drop(second);
        assert!(locks.try_acquire("img").unwrap().is_some());
    }

    #[test]
    fn test_lock_file_survives_release() {
        let temp = tempdir().unwrap();
        let locks = KeyLocks::new(temp.path().to_path_buf()).unwrap();

        let path = locks.acquire("web").unwrap().path().to_path_buf();
        assert!(path.exists());
    }
}
