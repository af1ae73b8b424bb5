// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The global garbage-collector lock.
//!
//! `<state_dir>/gc.lock` is the barrier between a running collection and
//! every mutator. The collector holds it in write mode for the duration
//! of root discovery and classification; mutators take it briefly in
//! read mode when registering a persistent root or creating their
//! temp-roots file, so a mutator that got in before the collector is
//! guaranteed to finish before roots are read.

use std::fs::File;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{IoContext, Result};
use crate::fslock::{self, LockType};

const GC_LOCK_NAME: &str = "gc.lock";

/// RAII guard for the global GC lock. Dropping it releases the lock.
pub struct GcLock {
    _file: File,
}

impl GcLock {
    /// Acquire the global GC lock in the given mode, blocking if needed.
    ///
    /// Contention is logged once at info level before the blocking wait.
    pub fn acquire(state_dir: &Path, lock_type: LockType) -> Result<GcLock> {
        let path = state_dir.join(GC_LOCK_NAME);
        debug!("acquiring global GC lock '{}'", path.display());

        let file = fslock::open_lock_file(&path)
            .io_context(|| format!("opening global GC lock '{}'", path.display()))?;

        if !fslock::try_lock(&file, lock_type)
            .io_context(|| format!("locking global GC lock '{}'", path.display()))?
        {
            info!("waiting for the big garbage collector lock...");
            fslock::lock(&file, lock_type)
                .io_context(|| format!("locking global GC lock '{}'", path.display()))?;
        }

        Ok(GcLock { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let _lock = GcLock::acquire(dir.path(), LockType::Write).unwrap();
        assert!(dir.path().join(GC_LOCK_NAME).exists());
    }

    #[test]
    fn test_readers_share_writer_excludes() {
        let dir = TempDir::new().unwrap();

        let _reader = GcLock::acquire(dir.path(), LockType::Read).unwrap();
        let _another = GcLock::acquire(dir.path(), LockType::Read).unwrap();

        let file = fslock::open_lock_file(&dir.path().join(GC_LOCK_NAME)).unwrap();
        assert!(!fslock::try_lock(&file, LockType::Write).unwrap());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();

        let lock = GcLock::acquire(dir.path(), LockType::Write).unwrap();
        let file = fslock::open_lock_file(&dir.path().join(GC_LOCK_NAME)).unwrap();
        assert!(!fslock::try_lock(&file, LockType::Read).unwrap());

        drop(lock);
        assert!(fslock::try_lock(&file, LockType::Read).unwrap());
    }
}
