// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The liveness engine and the collection cycle.
//!
//! Liveness is decided per strongly connected component: with
//! `keep_derivations` a derivation pulls in its valid outputs, with
//! `keep_outputs` a path pulls in its valid derivers, and with both set
//! those edges form cycles. A component is expanded to a fixpoint and
//! then judged as one unit — it is garbage only if none of its members
//! is a root and every outside referrer is garbage too.
//!
//! Deletion is ordered: referrers go before the paths they reference,
//! and valid directories are invalidated and renamed to `<p>-gc-<pid>`
//! while the GC lock is held, then physically removed after it is
//! released. The renamed name cannot collide with any store path, so an
//! installer recreating `p` during the slow-deletion window cannot
//! revive the doomed tree.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use nix::unistd::getpid;
use rand::seq::SliceRandom as _;
use rand::thread_rng;
use tracing::{debug, info};

use coda_store_core::StorePath;

use crate::delete::{delete_path, make_mutable};
use crate::error::{GcError, IoContext, Result};
use crate::fslock::LockType;
use crate::gclock::GcLock;
use crate::links::remove_unused_links;
use crate::roots::{find_roots, find_runtime_roots};
use crate::store::LocalStore;
use crate::temproots::read_temp_roots;

/// What a collection cycle should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcAction {
    /// Report the set of live paths; delete nothing.
    ReturnLive,
    /// Report the set of dead paths; delete nothing.
    ReturnDead,
    /// Delete every dead path.
    DeleteDead,
    /// Delete exactly `paths_to_delete`, failing if any of them is live.
    DeleteSpecific,
}

/// Options for one collection cycle.
#[derive(Debug, Clone)]
pub struct GcOptions {
    pub action: GcAction,

    /// Only used by [`GcAction::DeleteSpecific`].
    pub paths_to_delete: BTreeSet<StorePath>,

    /// Only with [`GcAction::DeleteSpecific`]: skip the reachability
    /// check, and suppress the keep-outputs/keep-derivations policies so
    /// deletion cannot cascade.
    pub ignore_liveness: bool,

    /// Stop once at least this many bytes have been freed or scheduled.
    /// Soft cap: overshoots by at most one path's worth, because the
    /// check runs after each deletion.
    pub max_freed: u64,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            action: GcAction::DeleteDead,
            paths_to_delete: BTreeSet::new(),
            ignore_liveness: false,
            max_freed: u64::MAX,
        }
    }
}

/// Outcome of a collection cycle.
#[derive(Debug, Default)]
pub struct GcResults {
    /// The live paths for [`GcAction::ReturnLive`], otherwise the dead
    /// (deleted or would-be-deleted) paths.
    pub paths: BTreeSet<PathBuf>,

    /// Bytes actually reclaimed from disk.
    pub bytes_freed: u64,
}

fn should_delete(action: GcAction) -> bool {
    matches!(action, GcAction::DeleteDead | GcAction::DeleteSpecific)
}

/// Internal unwinding signal for the liveness walk: either the byte
/// budget is exhausted (not an error; the cycle proceeds to cleanup) or
/// a real error.
enum Abort {
    Limit,
    Err(GcError),
}

impl From<GcError> for Abort {
    fn from(e: GcError) -> Self {
        Abort::Err(e)
    }
}

impl From<coda_store_db::Error> for Abort {
    fn from(e: coda_store_db::Error) -> Self {
        Abort::Err(e.into())
    }
}

struct GcState<'a> {
    store: &'a LocalStore,
    options: &'a GcOptions,
    keep_outputs: bool,
    keep_derivations: bool,
    links_dir: PathBuf,
    roots: BTreeSet<PathBuf>,
    temp_roots: BTreeSet<StorePath>,
    deleted: BTreeSet<PathBuf>,
    live: BTreeSet<PathBuf>,
    /// Renamed `-gc-<pid>` directories awaiting out-of-lock deletion.
    invalidated: Vec<PathBuf>,
    bytes_invalidated: u64,
    results: GcResults,
}

impl<'a> GcState<'a> {
    fn new(
        store: &'a LocalStore,
        options: &'a GcOptions,
        keep_outputs: bool,
        keep_derivations: bool,
    ) -> Self {
        Self {
            store,
            options,
            keep_outputs,
            keep_derivations,
            links_dir: store.store_dir().links_dir(),
            roots: BTreeSet::new(),
            temp_roots: BTreeSet::new(),
            deleted: BTreeSet::new(),
            live: BTreeSet::new(),
            invalidated: Vec::new(),
            bytes_invalidated: 0,
            results: GcResults::default(),
        }
    }

    fn is_valid_path(&self, path: &Path) -> Result<bool> {
        match path.to_str() {
            Some(s) => Ok(self.store.db().is_valid_path(s)?),
            None => Ok(false),
        }
    }

    /// An invalid path named `<tempRoot><suffix>` belongs to a build in
    /// progress and must not be touched.
    fn is_active_temp_file(&self, path: &Path, suffix: &str) -> bool {
        path.to_str()
            .and_then(|s| s.strip_suffix(suffix))
            .is_some_and(|prefix| self.temp_roots.iter().any(|t| t.as_str() == prefix))
    }

    fn mark_live(&mut self, paths: &BTreeSet<PathBuf>) {
        for p in paths {
            self.live.insert(p.clone());
            if self.options.action == GcAction::ReturnLive {
                self.results.paths.insert(p.clone());
            }
        }
    }

    fn delete_garbage(&mut self, path: &Path) -> Result<()> {
        info!("deleting '{}'", path.display());
        let freed = delete_path(path).io_context(|| format!("deleting '{}'", path.display()))?;
        self.results.bytes_freed += freed;
        Ok(())
    }

    /// Expand `path` to its liveness component under the keep policies.
    ///
    /// Worklist fixpoint: derivations pull in their valid outputs,
    /// outputs pull in their valid derivers.
    fn expand_component(&self, path: &Path) -> std::result::Result<BTreeSet<PathBuf>, Abort> {
        let mut paths = BTreeSet::new();
        let mut todo = vec![path.to_owned()];

        while let Some(p) = todo.pop() {
            if paths.contains(&p) {
                continue;
            }
            let store_path = self.store.parse_store_path(&p)?;
            paths.insert(p);

            if self.keep_derivations && store_path.is_derivation() {
                for output in self.store.db().query_derivation_outputs(store_path.as_str())? {
                    if self.store.db().is_valid_path(&output)? {
                        todo.push(PathBuf::from(output));
                    }
                }
            }
            if self.keep_outputs {
                for deriver in self.store.db().query_valid_derivers(store_path.as_str())? {
                    todo.push(PathBuf::from(deriver));
                }
            }
        }

        Ok(paths)
    }

    /// Remove one member of a doomed component.
    ///
    /// Valid directories are invalidated, made renameable, and moved to
    /// `<p>-gc-<pid>` for deletion after the GC lock is released; valid
    /// non-directories and invalid paths are deleted in place.
    fn delete_member(&mut self, path: &Path) -> std::result::Result<(), Abort> {
        if !self.is_valid_path(path)? {
            self.delete_garbage(path)?;
            return Ok(());
        }

        // Valid implies it parsed, which implies UTF-8.
        let s = path.to_str().expect("valid store path is UTF-8");

        let st = match fs::symlink_metadata(path) {
            Ok(st) => Some(st),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(Abort::Err(GcError::io(
                    format!("getting status of '{}'", path.display()),
                    e,
                )))
            }
        };

        match st {
            Some(st) if st.is_dir() => {
                info!("invalidating '{}'", path.display());
                let nar_size = self
                    .store
                    .db()
                    .query_path_info(s)?
                    .and_then(|info| info.nar_size)
                    .unwrap_or(0);
                self.bytes_invalidated += nar_size;
                self.store.db().invalidate_path_checked(s)?;

                make_mutable(path);
                // Read-only directories cannot be renamed on some
                // platforms.
                fs::set_permissions(
                    path,
                    fs::Permissions::from_mode((st.permissions().mode() & 0o7777) | 0o200),
                )
                .io_context(|| format!("making '{}' writable", path.display()))?;

                let tmp = PathBuf::from(format!("{}-gc-{}", path.display(), getpid()));
                fs::rename(path, &tmp).io_context(|| {
                    format!(
                        "unable to rename '{}' to '{}'",
                        path.display(),
                        tmp.display()
                    )
                })?;
                self.invalidated.push(tmp);
            }
            _ => {
                self.store.db().invalidate_path_checked(s)?;
                self.delete_garbage(path)?;
            }
        }

        Ok(())
    }

    /// Decide the fate of `path`, deleting it (and its component) if
    /// dead. Returns `true` iff the path is gone or was never there,
    /// `false` iff it is live.
    fn try_to_delete(&mut self, path: &Path) -> std::result::Result<bool, Abort> {
        self.store.interrupt().check()?;

        // Never consider the link pool itself; it gets its own sweep.
        if path == self.links_dir {
            return Ok(true);
        }

        match fs::symlink_metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(Abort::Err(GcError::io(
                    format!("getting status of '{}'", path.display()),
                    e,
                )))
            }
        }

        if self.deleted.contains(path) {
            return Ok(true);
        }
        if self.live.contains(path) {
            return Ok(false);
        }

        debug!("considering whether to delete '{}'", path.display());

        let paths = if self.is_valid_path(path)? {
            self.expand_component(path)?
        } else {
            // A lock file belonging to a path that is being built right
            // now isn't garbage, and neither is the build's scratch
            // directory.
            if self.is_active_temp_file(path, ".lock") {
                return Ok(false);
            }
            if self.is_active_temp_file(path, ".chroot") {
                return Ok(false);
            }
            BTreeSet::from([path.to_owned()])
        };

        // A root anywhere in the component keeps all of it.
        for p in &paths {
            if self.roots.contains(p) {
                debug!("cannot delete '{}' because it's a root", p.display());
                self.mark_live(&paths);
                return Ok(false);
            }
        }

        // The component can only go if everything referring to it from
        // outside goes.
        let mut referrers = BTreeSet::new();
        for p in &paths {
            if let Some(s) = p.to_str() {
                if self.store.db().is_valid_path(s)? {
                    referrers.extend(
                        self.store
                            .db()
                            .query_referrers(s)?
                            .into_iter()
                            .map(PathBuf::from),
                    );
                }
            }
        }
        for referrer in &referrers {
            if paths.contains(referrer) {
                continue;
            }
            if !self.try_to_delete(referrer)? {
                debug!(
                    "cannot delete '{}' because it has live referrers",
                    path.display()
                );
                self.mark_live(&paths);
                return Ok(false);
            }
        }

        // Garbage. Delete referrers before their referents: a path can
        // only be removed once nothing left on disk names it.
        let sorted: Vec<PathBuf> = if paths.len() <= 1 {
            paths.iter().cloned().collect()
        } else {
            let set: BTreeSet<String> = paths
                .iter()
                .filter_map(|p| p.to_str().map(str::to_owned))
                .collect();
            self.store
                .db()
                .topo_sort_paths(&set)?
                .into_iter()
                .map(PathBuf::from)
                .collect()
        };

        for p in sorted {
            if should_delete(self.options.action) {
                self.delete_member(&p)?;
            } else {
                debug!("would delete '{}'", p.display());
            }

            self.deleted.insert(p.clone());
            if self.options.action != GcAction::ReturnLive {
                self.results.paths.insert(p);
            }

            if should_delete(self.options.action)
                && self.results.bytes_freed + self.bytes_invalidated > self.options.max_freed
            {
                info!(
                    "deleted or invalidated more than {} bytes; stopping",
                    self.options.max_freed
                );
                return Err(Abort::Limit);
            }
        }

        Ok(true)
    }
}

impl LocalStore {
    /// Run one garbage collection cycle.
    ///
    /// Acquires the global GC lock in write mode, discovers persistent,
    /// runtime and temporary roots, classifies (and under a deleting
    /// action removes) store entries, then releases the lock before the
    /// slow deletion of renamed directories, the link-pool sweep, and
    /// the database vacuum.
    pub fn collect_garbage(&mut self, options: &GcOptions) -> Result<GcResults> {
        let store = &*self;

        let mut keep_outputs = store.keep_outputs();
        let mut keep_derivations = store.keep_derivations();
        // `ignore_liveness` with specific deletion must not cascade into
        // outputs or derivers.
        if options.action == GcAction::DeleteSpecific && options.ignore_liveness {
            keep_outputs = false;
            keep_derivations = false;
        }

        let mut state = GcState::new(store, options, keep_outputs, keep_derivations);

        // Blocks registration of new roots and creation of new
        // temp-roots files for the critical window.
        let gc_lock = GcLock::acquire(store.state_dir(), LockType::Write)?;

        info!("finding garbage collector roots...");
        if !options.ignore_liveness {
            let root_map = find_roots(store.db(), store.store_dir(), store.state_dir(), true)?;
            for store_path in root_map.into_values() {
                state.roots.insert(store_path.into_path_buf());
            }
            for store_path in
                find_runtime_roots(store.db(), store.store_dir(), store.libexec_dir())?
            {
                state.roots.insert(store_path.into_path_buf());
            }
        }

        // Takes read locks on every live temp-roots file; from here on
        // no process can add temporary roots until the cycle ends.
        let (temp_roots, _temp_root_fds) = read_temp_roots(store.state_dir(), store.store_dir())?;
        for store_path in &temp_roots {
            state.roots.insert(store_path.as_path().to_owned());
        }
        state.temp_roots = temp_roots;

        match options.action {
            GcAction::DeleteSpecific => {
                for store_path in &options.paths_to_delete {
                    match state.try_to_delete(store_path.as_path()) {
                        Ok(true) => {}
                        Ok(false) => {
                            return Err(GcError::StillAlive(store_path.as_path().to_owned()))
                        }
                        Err(Abort::Limit) => break,
                        Err(Abort::Err(e)) => return Err(e),
                    }
                }
            }
            _ if options.max_freed > 0 => {
                if should_delete(options.action) {
                    info!("deleting garbage...");
                } else {
                    info!("determining live/dead paths...");
                }

                // Stream the store directory rather than materializing
                // it, so collection starts promptly. Entries that are
                // not valid paths are deleted as they are encountered:
                // under a byte budget, junk beats unreachable-but-valid
                // paths, which could become reachable again.
                let dir = store.store_dir().as_path();
                let mut entries: Vec<PathBuf> = Vec::new();
                let mut limit_reached = false;
                for entry in fs::read_dir(dir)
                    .io_context(|| format!("opening directory '{}'", dir.display()))?
                {
                    store.interrupt().check()?;
                    let entry =
                        entry.io_context(|| format!("reading directory '{}'", dir.display()))?;
                    let path = entry.path();
                    if state.is_valid_path(&path)? {
                        entries.push(path);
                    } else {
                        match state.try_to_delete(&path) {
                            Ok(_) => {}
                            Err(Abort::Limit) => {
                                limit_reached = true;
                                break;
                            }
                            Err(Abort::Err(e)) => return Err(e),
                        }
                    }
                }

                if !limit_reached {
                    // Shuffle the valid entries so budget-capped runs do
                    // not favour paths that sort first.
                    entries.shuffle(&mut thread_rng());
                    for path in entries {
                        match state.try_to_delete(&path) {
                            Ok(_) => {}
                            Err(Abort::Limit) => break,
                            Err(Abort::Err(e)) => return Err(e),
                        }
                    }
                }
            }
            _ => {}
        }

        // Let other processes at the store again before the slow part.
        drop(gc_lock);

        // The renamed directories cannot be revived under their
        // `-gc-<pid>` names; delete them now, without the lock.
        let invalidated = std::mem::take(&mut state.invalidated);
        for path in invalidated {
            state.delete_garbage(&path)?;
        }

        let mut results = state.results;

        if should_delete(options.action) {
            info!("deleting unused links...");
            results.bytes_freed +=
                remove_unused_links(&store.store_dir().links_dir(), store.interrupt())?;
        }

        if options.action == GcAction::DeleteDead {
            store.db().vacuum()?;
        }

        Ok(results)
    }
}
