// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Persistent GC roots: discovery and registration.
//!
//! Persistent roots are symlinks under `<state_dir>/gcroots` pointing
//! into the store, either directly or via one level of indirection: an
//! "indirect" root is a symlink in `gcroots/auto/` named by a digest of
//! its target, where the target is a user-owned symlink outside the
//! store (e.g. a `result` link in a build tree) that points into it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use nix::unistd::getpid;
use ring::digest;
use tracing::{debug, info, trace, warn};

use coda_store_core::{nix_base32_encode, StoreDir, StorePath};
use coda_store_db::StoreDb;

use crate::error::{GcError, IoContext, Result};
use crate::fslock::LockType;
use crate::gclock::GcLock;
use crate::store::LocalStore;

const GC_ROOTS_DIR: &str = "gcroots";

/// Environment variable naming an external program that prints runtime
/// roots (one path per line) on stdout. Set to the empty string to
/// disable. Paths containing newlines are not representable in this
/// protocol.
pub const ROOT_FINDER_ENV: &str = "NIX_ROOT_FINDER";

pub(crate) fn gc_roots_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(GC_ROOTS_DIR)
}

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem. Symlink targets are resolved one step at a time by the
/// scanner, so lexical cleanup is all that is wanted here.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out
}

/// Resolve a symlink's target one step, relative to the link's own
/// directory.
fn resolve_link(link: &Path) -> std::io::Result<PathBuf> {
    let target = fs::read_link(link)?;
    let absolute = if target.is_absolute() {
        target
    } else {
        link.parent().unwrap_or(Path::new("/")).join(target)
    };
    Ok(lexical_normalize(&absolute))
}

fn is_skippable_walk_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::NotADirectory
    )
}

fn walk_roots(
    db: &StoreDb,
    store_dir: &StoreDir,
    path: &Path,
    recurse_symlinks: bool,
    delete_stale: bool,
    roots: &mut BTreeMap<PathBuf, StorePath>,
) -> Result<()> {
    let st = match fs::symlink_metadata(path) {
        Ok(st) => st,
        Err(e) if is_skippable_walk_error(&e) => {
            info!("cannot read potential root '{}'", path.display());
            return Ok(());
        }
        Err(e) => return Err(GcError::io(format!("statting '{}'", path.display()), e)),
    };

    trace!("looking at '{}'", path.display());

    if st.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if is_skippable_walk_error(&e) => {
                info!("cannot read potential root '{}'", path.display());
                return Ok(());
            }
            Err(e) => {
                return Err(GcError::io(
                    format!("opening directory '{}'", path.display()),
                    e,
                ))
            }
        };
        for entry in entries {
            let entry =
                entry.io_context(|| format!("reading directory '{}'", path.display()))?;
            walk_roots(
                db,
                store_dir,
                &entry.path(),
                recurse_symlinks,
                delete_stale,
                roots,
            )?;
        }
    } else if st.file_type().is_symlink() {
        let target = match resolve_link(path) {
            Ok(target) => target,
            Err(e) if is_skippable_walk_error(&e) => {
                info!("cannot read potential root '{}'", path.display());
                return Ok(());
            }
            Err(e) => return Err(GcError::io(format!("reading link '{}'", path.display()), e)),
        };

        if store_dir.contains(&target) {
            match store_dir.to_store_path(&target) {
                Ok(store_path) if db.is_valid_path(store_path.as_str())? => {
                    debug!("found root '{store_path}' in '{}'", path.display());
                    roots.insert(path.to_owned(), store_path);
                }
                _ => {
                    info!(
                        "skipping invalid root from '{}' to '{}'",
                        path.display(),
                        target.display()
                    );
                }
            }
        } else if recurse_symlinks {
            // An indirect root: follow the outer link exactly once.
            if target.exists() {
                walk_roots(db, store_dir, &target, false, delete_stale, roots)?;
            } else if delete_stale {
                // Only delete while still inside the gcroots tree; stuff
                // outside it is never touched.
                info!(
                    "removing stale link from '{}' to '{}'",
                    path.display(),
                    target.display()
                );
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(GcError::io(format!("removing '{}'", path.display()), e))
                    }
                }
            }
        }
    }
    // Other file types are ignored.

    Ok(())
}

/// Enumerate the persistent roots by walking `<state_dir>/gcroots`.
///
/// Returns a map from root link to the store path it pins. With
/// `delete_stale`, dangling indirect-root links inside the roots tree
/// are unlinked along the way.
pub(crate) fn find_roots(
    db: &StoreDb,
    store_dir: &StoreDir,
    state_dir: &Path,
    delete_stale: bool,
) -> Result<BTreeMap<PathBuf, StorePath>> {
    let mut roots = BTreeMap::new();
    let roots_dir = gc_roots_dir(state_dir);
    walk_roots(db, store_dir, &roots_dir, true, delete_stale, &mut roots)?;
    Ok(roots)
}

/// Create `link` pointing at `target`, atomically: symlink to a
/// temporary name in the same directory, then rename over the
/// destination. Parent directories are created as needed.
pub(crate) fn create_symlink(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .io_context(|| format!("creating directory '{}'", parent.display()))?;
    }

    let temp_link = PathBuf::from(format!(
        "{}.tmp-{}-{}",
        link.display(),
        getpid(),
        rand::random::<u32>()
    ));
    std::os::unix::fs::symlink(target, &temp_link).io_context(|| {
        format!(
            "symlinking '{}' to '{}'",
            temp_link.display(),
            target.display()
        )
    })?;
    fs::rename(&temp_link, link).io_context(|| {
        format!(
            "cannot rename '{}' to '{}'",
            temp_link.display(),
            link.display()
        )
    })?;
    Ok(())
}

/// Run the external root-finder program and collect the valid store
/// paths it reports.
///
/// The program comes from [`ROOT_FINDER_ENV`], defaulting to
/// `<libexec_dir>/nix/find-runtime-roots`; the empty string disables it,
/// and a missing default program is treated as absent rather than an
/// error.
pub(crate) fn find_runtime_roots(
    db: &StoreDb,
    store_dir: &StoreDir,
    libexec_dir: &Path,
) -> Result<BTreeSet<StorePath>> {
    let mut roots = BTreeSet::new();

    let (program, explicit) = match std::env::var_os(ROOT_FINDER_ENV) {
        Some(value) if value.is_empty() => return Ok(roots),
        Some(value) => (PathBuf::from(value), true),
        None => (libexec_dir.join("nix/find-runtime-roots"), false),
    };

    if !explicit && !program.exists() {
        debug!("root finder '{}' not installed", program.display());
        return Ok(roots);
    }

    debug!("executing '{}' to find additional roots", program.display());
    let output = Command::new(&program)
        .output()
        .io_context(|| format!("running root finder '{}'", program.display()))?;
    if !output.status.success() {
        return Err(GcError::RootFinderFailed {
            program,
            status: output.status.to_string(),
        });
    }

    for line in output.stdout.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
        let path = Path::new(std::ffi::OsStr::from_bytes(line));
        if !store_dir.contains(path) {
            continue;
        }
        if let Ok(store_path) = store_dir.to_store_path(path) {
            if db.is_valid_path(store_path.as_str())? {
                debug!("got additional root '{store_path}'");
                roots.insert(store_path);
            }
        }
    }

    Ok(roots)
}

impl LocalStore {
    /// Enumerate persistent roots without deleting stale links.
    pub fn find_roots(&self) -> Result<BTreeMap<PathBuf, StorePath>> {
        find_roots(self.db(), self.store_dir(), self.state_dir(), false)
    }

    /// Register `path` as an indirect root: a symlink in
    /// `gcroots/auto/`, named by a digest of `path`, pointing at it.
    pub fn add_indirect_root(&self, path: &Path) -> Result<()> {
        let digest = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, path.as_os_str().as_bytes());
        let name = nix_base32_encode(digest.as_ref());
        let real_root = gc_roots_dir(self.state_dir()).join("auto").join(name);
        create_symlink(&real_root, path)
    }

    /// Register a persistent root `gc_root` pointing at `store_path`.
    ///
    /// In indirect mode `gc_root` is a user-owned symlink outside the
    /// store that is additionally registered via
    /// [`add_indirect_root`](Self::add_indirect_root); otherwise it must
    /// live under `<state_dir>/gcroots` unless `allow_outside_roots_dir`
    /// is set. Finishes by briefly taking the GC lock in read mode, so
    /// that a collection cycle already past root discovery completes
    /// before this returns — the new root cannot be missed by it.
    pub fn add_perm_root(
        &self,
        store_path: &StorePath,
        gc_root: &Path,
        indirect: bool,
        allow_outside_roots_dir: bool,
    ) -> Result<PathBuf> {
        let gc_root = lexical_normalize(gc_root);

        if self.store_dir().contains(&gc_root) {
            return Err(GcError::RootInStore(gc_root));
        }

        if indirect {
            // Don't clobber a link that already exists and doesn't point
            // into the store.
            if gc_root.exists() {
                let points_into_store = gc_root.is_symlink()
                    && resolve_link(&gc_root)
                        .map(|t| self.store_dir().contains(&t))
                        .unwrap_or(false);
                if !points_into_store {
                    return Err(GcError::RootLinkExists(gc_root));
                }
            }
            create_symlink(&gc_root, store_path.as_path())?;
            self.add_indirect_root(&gc_root)?;
        } else {
            if !allow_outside_roots_dir {
                let roots_dir = gc_roots_dir(self.state_dir());
                if !gc_root.starts_with(&roots_dir) {
                    return Err(GcError::RootOutsideRootsDir {
                        path: gc_root,
                        roots_dir,
                    });
                }
            }
            create_symlink(&gc_root, store_path.as_path())?;
        }

        if self.check_root_reachability() {
            let roots = self.find_roots()?;
            if !roots.contains_key(&gc_root) {
                warn!(
                    "'{}' is not in a directory where the garbage collector looks for roots; \
                     therefore, '{store_path}' might be removed by the garbage collector",
                    gc_root.display()
                );
            }
        }

        // Block while a collection is in progress, so the set of
        // permanent roots cannot grow under a running collector.
        self.sync_with_gc()?;

        Ok(gc_root)
    }

    /// Take and release the GC lock in read mode.
    ///
    /// Returns only once no collector is inside its critical window.
    pub fn sync_with_gc(&self) -> Result<()> {
        GcLock::acquire(self.state_dir(), LockType::Read).map(drop)
    }
}
