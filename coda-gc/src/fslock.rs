// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Advisory whole-file read/write locks.
//!
//! Built on open-file-description locks (`fcntl` with `F_OFD_SETLK`):
//! the lock belongs to the open file description, conversions between
//! read and write mode are atomic, and the lock disappears when the
//! last descriptor is closed — which is how a dead process's temp-roots
//! file becomes detectable. Two separate opens of the same file contend
//! even within one process.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};

/// Lock mode: many readers or one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Read,
    Write,
}

impl LockType {
    fn as_flock_type(self) -> libc::c_short {
        match self {
            LockType::Read => libc::F_RDLCK as libc::c_short,
            LockType::Write => libc::F_WRLCK as libc::c_short,
        }
    }
}

fn fcntl_setlk(file: &File, lock_type: libc::c_short, wait: bool) -> io::Result<bool> {
    // SAFETY: a zero-initialised flock is valid on all supported
    // platforms; l_pid must be 0 for OFD locks. l_start = l_len = 0
    // covers the whole file regardless of its size.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = lock_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;

    loop {
        let arg = if wait {
            FcntlArg::F_OFD_SETLKW(&fl)
        } else {
            FcntlArg::F_OFD_SETLK(&fl)
        };
        match fcntl(file.as_raw_fd(), arg) {
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(Errno::EACCES | Errno::EAGAIN) if !wait => return Ok(false),
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// Acquire `lock_type` on `file`, blocking until available.
///
/// If the descriptor already holds a lock, this converts it in place:
/// an upgrade from [`LockType::Read`] keeps the read lock held while
/// blocked, so a non-blocking writer polling the file keeps failing.
pub fn lock(file: &File, lock_type: LockType) -> io::Result<()> {
    fcntl_setlk(file, lock_type.as_flock_type(), true).map(|_| ())
}

/// Try to acquire `lock_type` on `file` without blocking.
///
/// Returns `false` if another open file description holds a conflicting
/// lock.
pub fn try_lock(file: &File, lock_type: LockType) -> io::Result<bool> {
    fcntl_setlk(file, lock_type.as_flock_type(), false)
}

/// Release any lock held on `file`.
pub fn unlock(file: &File) -> io::Result<()> {
    fcntl_setlk(file, libc::F_UNLCK as libc::c_short, true).map(|_| ())
}

/// Open (and create, mode 0600) a lock file at `path`.
pub fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}
