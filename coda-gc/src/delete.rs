// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Physical removal of store paths.
//!
//! Store entries are written read-only and may carry the immutable
//! attribute, so deletion restores write permission on directories (a
//! directory must be writable to unlink its entries) and clears the
//! immutable flag first. Freed bytes are `st_blocks * 512` summed over
//! the removed tree; only what was actually unlinked is credited.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};
use std::path::Path;

/// Clear the immutable attribute, if the platform and filesystem have
/// one. Best effort: failure just means the following unlink may fail
/// instead.
#[cfg(target_os = "linux")]
pub(crate) fn make_mutable(path: &Path) {
    use std::os::fd::AsRawFd;

    use tracing::debug;

    // Not exposed by the `libc` crate; fixed by the Linux kernel ABI
    // (see `include/uapi/linux/fs.h`, `FS_IMMUTABLE_FL`).
    const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

    let Ok(file) = fs::File::open(path) else {
        return;
    };
    // The attr-flags ioctls traffic in an int, despite the macro types.
    let mut flags: libc::c_int = 0;
    // SAFETY: fd is valid for the lifetime of `file`, flags is a live
    // out-parameter on the stack.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::FS_IOC_GETFLAGS, &mut flags) };
    if ret != 0 || flags & FS_IMMUTABLE_FL == 0 {
        return;
    }
    flags &= !FS_IMMUTABLE_FL;
    debug!("clearing immutable flag on '{}'", path.display());
    // SAFETY: same as above.
    unsafe { libc::ioctl(file.as_raw_fd(), libc::FS_IOC_SETFLAGS, &flags) };
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn make_mutable(_path: &Path) {}

fn remove_file_forced(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            make_mutable(path);
            fs::remove_file(path)
        }
        Err(e) => Err(e),
    }
}

fn delete_recursive(path: &Path) -> io::Result<u64> {
    let st = match fs::symlink_metadata(path) {
        Ok(st) => st,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut freed = st.blocks() * 512;

    if st.is_dir() {
        // The directory must be writable (and searchable) to unlink its
        // entries, and mutable to be modified at all. The immutable flag
        // has to go first: chmod on an immutable inode fails with EPERM.
        make_mutable(path);
        let mode = st.permissions().mode() & 0o7777;
        if mode & 0o700 != 0o700 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))?;
        }

        for entry in fs::read_dir(path)? {
            freed += delete_recursive(&entry?.path())?;
        }

        match fs::remove_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    } else {
        remove_file_forced(path)?;
    }

    Ok(freed)
}

/// Recursively remove `path`, returning the number of bytes freed.
///
/// A missing path is not an error and frees nothing.
pub fn delete_path(path: &Path) -> io::Result<u64> {
    delete_recursive(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;
    use tempfile::TempDir;

    #[test]
    fn test_missing_path_frees_nothing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(delete_path(&dir.path().join("nope")).unwrap(), 0);
    }

    #[test]
    fn test_deletes_file_and_counts_blocks() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("blob");
        fs::write(&file, vec![0u8; 8192]).unwrap();

        let freed = delete_path(&file).unwrap();
        assert!(!file.exists());
        assert!(freed >= 8192, "freed {freed} bytes");
    }

    #[test]
    fn test_deletes_read_only_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("pkg");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("data"), b"payload").unwrap();
        // Store entries are read-only on disk.
        fs::set_permissions(&root, fs::Permissions::from_mode(0o555)).unwrap();

        let freed = delete_path(&root).unwrap();
        assert!(!root.exists());
        assert!(freed > 0);
    }

    /// A subdirectory carrying the immutable flag must still be
    /// deletable: the flag has to be cleared before the chmod, which
    /// would otherwise fail with EPERM.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_deletes_immutable_subdirectory() {
        use std::os::fd::AsRawFd;

        fn set_immutable(path: &Path, on: bool) -> bool {
            // Not exposed by the `libc` crate; fixed by the Linux kernel ABI
            // (see `include/uapi/linux/fs.h`, `FS_IMMUTABLE_FL`).
            const FS_IMMUTABLE_FL: libc::c_int = 0x0000_0010;

            let Ok(file) = fs::File::open(path) else {
                return false;
            };
            let mut flags: libc::c_int = 0;
            if unsafe { libc::ioctl(file.as_raw_fd(), libc::FS_IOC_GETFLAGS, &mut flags) } != 0 {
                return false;
            }
            if on {
                flags |= FS_IMMUTABLE_FL;
            } else {
                flags &= !FS_IMMUTABLE_FL;
            }
            (unsafe { libc::ioctl(file.as_raw_fd(), libc::FS_IOC_SETFLAGS, &flags) }) == 0
        }

        let dir = TempDir::new().unwrap();
        let root = dir.path().join("pkg");
        let sub = root.join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("data"), b"payload").unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o555)).unwrap();

        // Setting the flag needs CAP_LINUX_IMMUTABLE and a filesystem
        // with attr support; without either there is nothing to test.
        if !set_immutable(&sub, true) {
            return;
        }

        let result = delete_path(&root);
        if result.is_err() {
            // Leave the tree deletable for TempDir cleanup.
            set_immutable(&sub, false);
        }
        result.unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_deletes_symlink_without_following() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, b"keep me").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        delete_path(&link).unwrap();
        assert!(!link.is_symlink());
        assert!(target.exists());
    }
}
