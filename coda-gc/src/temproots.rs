// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Per-process temporary GC roots.
//!
//! Every process that needs to pin store paths for its own lifetime owns
//! `<state_dir>/temproots/<pid>`, a concatenation of NUL-terminated store
//! paths. The file carries a read lock for as long as its owner lives;
//! appending momentarily upgrades it to a write lock. The collector
//! detects dead owners by taking a non-blocking write lock: that can only
//! succeed once every descriptor of the owner is closed.
//!
//! Reaping unlinks the file and then writes a single sentinel byte into
//! the orphaned inode. A writer that raced with the reaper sees its
//! freshly locked file non-empty and retries from scratch; a zero size
//! means the incarnation it locked is the one it created.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};

use nix::unistd::getpid;
use tracing::{debug, warn};

use coda_store_core::{StoreDir, StorePath};

use crate::error::{GcError, IoContext, Result};
use crate::fslock::{self, LockType};
use crate::gclock::GcLock;

const TEMP_ROOTS_DIR: &str = "temproots";

pub(crate) fn temp_roots_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(TEMP_ROOTS_DIR)
}

/// Writer-side handle to this process's temp-roots file.
///
/// The file is created lazily on the first [`add`](TempRoots::add) and
/// unlinked when the handle is dropped. One handle per process is
/// intended; embedders wanting process-global behavior wrap it in their
/// own singleton.
pub struct TempRoots {
    state_dir: PathBuf,
    file: Option<(PathBuf, File)>,
}

impl TempRoots {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            file: None,
        }
    }

    /// Record `path` as in use for the lifetime of this handle.
    pub fn add(&mut self, path: &StorePath) -> Result<()> {
        self.ensure_open()?;
        let (fn_temp, file) = self.file.as_ref().expect("temp-roots file just opened");

        // Blocks while the collector holds a read lock on our file, i.e.
        // while it is deciding liveness; our new root is either seen by
        // this cycle or added after it finishes.
        debug!("acquiring write lock on '{}'", fn_temp.display());
        fslock::lock(file, LockType::Write)
            .io_context(|| format!("locking '{}'", fn_temp.display()))?;

        let mut record = Vec::with_capacity(path.as_str().len() + 1);
        record.extend_from_slice(path.as_str().as_bytes());
        record.push(0);
        let mut writer: &File = file;
        writer
            .write_all(&record)
            .io_context(|| format!("writing to '{}'", fn_temp.display()))?;

        debug!("downgrading to read lock on '{}'", fn_temp.display());
        fslock::lock(file, LockType::Read)
            .io_context(|| format!("locking '{}'", fn_temp.display()))?;
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        loop {
            let dir = temp_roots_dir(&self.state_dir);
            fs::create_dir_all(&dir)
                .io_context(|| format!("creating directory '{}'", dir.display()))?;
            let fn_temp = dir.join(getpid().to_string());

            let gc_lock = GcLock::acquire(&self.state_dir, LockType::Read)?;

            if fn_temp.exists() {
                // Must be stale: no two live processes share a pid.
                fs::remove_file(&fn_temp)
                    .io_context(|| format!("removing stale file '{}'", fn_temp.display()))?;
            }

            let file = fslock::open_lock_file(&fn_temp)
                .io_context(|| format!("opening '{}'", fn_temp.display()))?;

            drop(gc_lock);

            debug!("acquiring read lock on '{}'", fn_temp.display());
            fslock::lock(&file, LockType::Read)
                .io_context(|| format!("locking '{}'", fn_temp.display()))?;

            // A collector that got in between our open and our lock has
            // unlinked this file and left a sentinel byte behind. Only a
            // zero-length file is the incarnation we created.
            let size = file
                .metadata()
                .io_context(|| format!("statting '{}'", fn_temp.display()))?
                .len();
            if size == 0 {
                self.file = Some((fn_temp, file));
                return Ok(());
            }
        }
    }
}

impl Drop for TempRoots {
    fn drop(&mut self) {
        if let Some((path, file)) = self.file.take() {
            drop(file);
            let _ = fs::remove_file(path);
        }
    }
}

/// Collector side: read every live process's temp roots.
///
/// Stale files (owner dead) are reaped. For live files a blocking read
/// lock is taken, which pins the owner: it cannot upgrade to write and
/// therefore cannot add roots until the returned descriptors are
/// dropped at the end of the collection cycle.
pub(crate) fn read_temp_roots(
    state_dir: &Path,
    store_dir: &StoreDir,
) -> Result<(BTreeSet<StorePath>, Vec<File>)> {
    let mut temp_roots = BTreeSet::new();
    let mut fds = Vec::new();

    let dir = temp_roots_dir(state_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((temp_roots, fds)),
        Err(e) => {
            return Err(GcError::io(
                format!("opening directory '{}'", dir.display()),
                e,
            ))
        }
    };

    for entry in entries {
        let entry = entry.io_context(|| format!("reading directory '{}'", dir.display()))?;
        let path = entry.path();
        debug!("reading temporary root file '{}'", path.display());

        let mut file = match fs::OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            // It's okay if the file has disappeared.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(GcError::io(
                    format!("opening temporary roots file '{}'", path.display()),
                    e,
                ))
            }
        };

        // A write lock can only be acquired if the owning process has
        // died; its roots no longer matter.
        if fslock::try_lock(&file, LockType::Write)
            .io_context(|| format!("locking '{}'", path.display()))?
        {
            warn!("removing stale temporary roots file '{}'", path.display());
            fs::remove_file(&path)
                .io_context(|| format!("removing '{}'", path.display()))?;
            file.write_all(b"d")
                .io_context(|| format!("writing to '{}'", path.display()))?;
            continue;
        }

        // Prevents the owner from upgrading to a write lock, so it will
        // block in its next add until this cycle completes.
        debug!("waiting for read lock on '{}'", path.display());
        fslock::lock(&file, LockType::Read)
            .io_context(|| format!("locking '{}'", path.display()))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .io_context(|| format!("reading '{}'", path.display()))?;

        for token in contents.split(|&b| b == 0).filter(|t| !t.is_empty()) {
            let root = store_dir.parse(Path::new(OsStr::from_bytes(token)))?;
            debug!("got temporary root '{root}'");
            temp_roots.insert(root);
        }

        fds.push(file); // keep open, still read-locked
    }

    Ok((temp_roots, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_dir() -> StoreDir {
        StoreDir::new("/nix/store").unwrap()
    }

    #[test]
    fn test_add_creates_locked_file() {
        let state = TempDir::new().unwrap();
        let mut roots = TempRoots::new(state.path());

        let sp = store_dir().parse(Path::new("/nix/store/abc-foo")).unwrap();
        roots.add(&sp).unwrap();

        let path = temp_roots_dir(state.path()).join(getpid().to_string());
        assert!(path.exists());

        // Owner holds a read lock: a probing writer must fail.
        let probe = fslock::open_lock_file(&path).unwrap();
        assert!(!fslock::try_lock(&probe, LockType::Write).unwrap());
    }

    #[test]
    fn test_reader_collects_live_roots() {
        let state = TempDir::new().unwrap();
        let store = store_dir();
        let mut roots = TempRoots::new(state.path());

        let a = store.parse(Path::new("/nix/store/abc-foo")).unwrap();
        let b = store.parse(Path::new("/nix/store/def-bar")).unwrap();
        roots.add(&a).unwrap();
        roots.add(&b).unwrap();

        let (collected, fds) = read_temp_roots(state.path(), &store).unwrap();
        assert_eq!(collected, BTreeSet::from([a, b]));
        assert_eq!(fds.len(), 1);

        // The file survives because its owner is alive.
        let path = temp_roots_dir(state.path()).join(getpid().to_string());
        assert!(path.exists());
    }

    #[test]
    fn test_reader_reaps_stale_file() {
        let state = TempDir::new().unwrap();
        let store = store_dir();

        // A file with no lock holder: its owner is gone.
        let dir = temp_roots_dir(state.path());
        fs::create_dir_all(&dir).unwrap();
        let stale = dir.join("999999999");
        fs::write(&stale, b"/nix/store/abc-foo\0").unwrap();

        let (collected, fds) = read_temp_roots(state.path(), &store).unwrap();
        assert!(collected.is_empty());
        assert!(fds.is_empty());
        assert!(!stale.exists());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let state = TempDir::new().unwrap();
        let (collected, fds) = read_temp_roots(state.path(), &store_dir()).unwrap();
        assert!(collected.is_empty());
        assert!(fds.is_empty());
    }

    #[test]
    fn test_drop_unlinks_file() {
        let state = TempDir::new().unwrap();
        let path = temp_roots_dir(state.path()).join(getpid().to_string());

        let mut roots = TempRoots::new(state.path());
        let sp = store_dir().parse(Path::new("/nix/store/abc-foo")).unwrap();
        roots.add(&sp).unwrap();
        assert!(path.exists());

        drop(roots);
        assert!(!path.exists());
    }

    /// A leftover file with our pid (unclean shutdown, or pid reuse
    /// across a reboot) is discarded and replaced by a fresh one.
    #[test]
    fn test_stale_pid_file_replaced() {
        let state = TempDir::new().unwrap();
        let dir = temp_roots_dir(state.path());
        fs::create_dir_all(&dir).unwrap();

        let fn_temp = dir.join(getpid().to_string());
        fs::write(&fn_temp, b"/nix/store/old-leftover\0").unwrap();

        let mut roots = TempRoots::new(state.path());
        let sp = store_dir().parse(Path::new("/nix/store/abc-foo")).unwrap();
        roots.add(&sp).unwrap();

        let contents = fs::read(&fn_temp).unwrap();
        assert_eq!(contents, b"/nix/store/abc-foo\0");
    }
}
