// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The local-store client the collector and mutators operate through.
//!
//! A [`LocalStore`] bundles the store directory, the state directory
//! (locks, roots, database), the metadata database connection, this
//! process's temp-roots handle, and the interruption flag. Root
//! registration and temp-root methods are what concurrent mutators
//! call; [`collect_garbage`](LocalStore::collect_garbage) is the
//! collector entry point.

use std::fs;
use std::path::Path;

use coda_store_core::{StoreDir, StorePath};
use coda_store_db::{OpenMode, StoreDb};

use crate::config::GcConfig;
use crate::error::{IoContext, Result};
use crate::interrupt::Interrupt;
use crate::roots::gc_roots_dir;
use crate::temproots::{temp_roots_dir, TempRoots};

pub struct LocalStore {
    store_dir: StoreDir,
    config: GcConfig,
    db: StoreDb,
    temp_roots: TempRoots,
    interrupt: Interrupt,
}

impl LocalStore {
    /// Open the store described by `config`, using the metadata database
    /// at `<state_dir>/db/db.sqlite`.
    pub fn open(config: GcConfig) -> Result<Self> {
        config.validate()?;
        let db = StoreDb::open(config.db_path(), OpenMode::ReadWrite)?;
        Self::with_db(config, db)
    }

    /// Open the store with an externally provided database connection.
    pub fn with_db(config: GcConfig, db: StoreDb) -> Result<Self> {
        config.validate()?;
        let store_dir = StoreDir::new(&config.store_dir)?;

        // Mutators and the collector both expect the state trees to be
        // in place.
        for dir in [gc_roots_dir(&config.state_dir), temp_roots_dir(&config.state_dir)] {
            fs::create_dir_all(&dir)
                .io_context(|| format!("creating directory '{}'", dir.display()))?;
        }

        let temp_roots = TempRoots::new(&config.state_dir);
        Ok(Self {
            store_dir,
            config,
            db,
            temp_roots,
            interrupt: Interrupt::new(),
        })
    }

    pub fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.config.state_dir
    }

    pub(crate) fn libexec_dir(&self) -> &Path {
        &self.config.libexec_dir
    }

    pub fn db(&self) -> &StoreDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut StoreDb {
        &mut self.db
    }

    pub fn keep_outputs(&self) -> bool {
        self.config.keep_outputs
    }

    pub fn keep_derivations(&self) -> bool {
        self.config.keep_derivations
    }

    pub(crate) fn check_root_reachability(&self) -> bool {
        self.config.check_root_reachability
    }

    /// The interruption flag checked on every per-path iteration.
    /// Clone it into a signal handler to make collection cancellable.
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Parse `path` as a path of this store.
    pub fn parse_store_path(&self, path: &Path) -> Result<StorePath> {
        Ok(self.store_dir.parse(path)?)
    }

    /// Record `path` as in use for the lifetime of this store client.
    ///
    /// Lazily creates this process's temp-roots file; the first call
    /// synchronizes with any running collection via the GC lock.
    pub fn add_temp_root(&mut self, path: &StorePath) -> Result<()> {
        self.temp_roots.add(path)
    }
}
