// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Sweep of the hard-link deduplication pool.
//!
//! The deduplicator replaces identical store files with hard links into
//! `<store_dir>/.links`. Once the last store path using a link is
//! collected, the pool entry's link count drops to 1 and it can be
//! unlinked.
//!
//! There is a known race with a concurrently running deduplicator: a
//! link count of 1 observed just before another path claims the link
//! can delete data that is about to be shared. Closing it would require
//! a lock shared with the deduplicator; until then the window is
//! accepted and this sweep must only run where that trade-off is
//! acceptable.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt as _;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{GcError, IoContext, Result};
use crate::interrupt::Interrupt;

/// Unlink every entry of `links_dir` whose link count is exactly 1.
///
/// Returns the bytes freed. Logs the net savings the remaining links
/// provide. A missing `links_dir` means no deduplication has ever run;
/// nothing to do.
pub(crate) fn remove_unused_links(links_dir: &Path, interrupt: &Interrupt) -> Result<u64> {
    let entries = match fs::read_dir(links_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(GcError::io(
                format!("opening directory '{}'", links_dir.display()),
                e,
            ))
        }
    };

    let mut bytes_freed = 0u64;
    let mut actual_size = 0i64;
    let mut unshared_size = 0i64;

    for entry in entries {
        interrupt.check()?;
        let entry = entry.io_context(|| format!("reading directory '{}'", links_dir.display()))?;
        let path = entry.path();

        let st = match fs::symlink_metadata(&path) {
            Ok(st) => st,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(GcError::io(format!("statting '{}'", path.display()), e)),
        };

        let size = st.blocks() * 512;

        if st.nlink() != 1 {
            actual_size += size as i64;
            unshared_size += (st.nlink() as i64 - 1) * size as i64;
            continue;
        }

        debug!("deleting unused link '{}'", path.display());
        match fs::remove_file(&path) {
            Ok(()) => bytes_freed += size,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(GcError::io(format!("deleting '{}'", path.display()), e)),
        }
    }

    let overhead = fs::metadata(links_dir)
        .map(|st| st.blocks() as i64 * 512)
        .unwrap_or(0);

    info!(
        "note: currently hard linking saves {:.2} MiB",
        (unshared_size - actual_size - overhead) as f64 / (1024.0 * 1024.0)
    );

    Ok(bytes_freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_links_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let freed = remove_unused_links(&dir.path().join(".links"), &Interrupt::new()).unwrap();
        assert_eq!(freed, 0);
    }

    #[test]
    fn test_sweeps_only_singly_linked_entries() {
        let dir = TempDir::new().unwrap();
        let links = dir.path().join(".links");
        fs::create_dir(&links).unwrap();

        // Unused: link count 1.
        let unused = links.join("aaaa");
        fs::write(&unused, vec![1u8; 4096]).unwrap();

        // In use: a second hard link from a store path.
        let used = links.join("bbbb");
        fs::write(&used, vec![2u8; 4096]).unwrap();
        fs::hard_link(&used, dir.path().join("claimed")).unwrap();

        let freed = remove_unused_links(&links, &Interrupt::new()).unwrap();
        assert!(!unused.exists());
        assert!(used.exists());
        assert!(freed >= 4096, "freed {freed} bytes");
    }

    #[test]
    fn test_interrupt_aborts_sweep() {
        let dir = TempDir::new().unwrap();
        let links = dir.path().join(".links");
        fs::create_dir(&links).unwrap();
        fs::write(links.join("aaaa"), b"x").unwrap();

        let interrupt = Interrupt::new();
        interrupt.set();
        assert!(matches!(
            remove_unused_links(&links, &interrupt),
            Err(GcError::Interrupted)
        ));
    }
}
