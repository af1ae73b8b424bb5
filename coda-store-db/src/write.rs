// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Write operations for the store database.
//!
//! Registration is used by installers and by tests; invalidation is used
//! by the garbage collector.

use std::collections::BTreeSet;
use std::time::SystemTime;

use rusqlite::params;

use crate::connection::StoreDb;
use crate::error::{Error, Result};
use crate::types::system_time_to_unix;

/// Parameters for registering a new valid path.
#[derive(Debug, Clone)]
pub struct RegisterPathParams {
    /// Full store path
    pub path: String,
    /// Base16-encoded content hash
    pub hash: String,
    /// When this path was registered
    pub registration_time: SystemTime,
    /// Derivation that produced this (if any)
    pub deriver: Option<String>,
    /// NAR size in bytes
    pub nar_size: Option<u64>,
    /// Whether built locally (not substituted)
    pub ultimate: bool,
    /// Space-separated signatures
    pub sigs: Option<String>,
    /// Content address (if content-addressed)
    pub ca: Option<String>,
    /// Paths this references
    pub references: BTreeSet<String>,
}

impl Default for RegisterPathParams {
    fn default() -> Self {
        Self {
            path: String::new(),
            hash: String::new(),
            registration_time: SystemTime::now(),
            deriver: None,
            nar_size: None,
            ultimate: false,
            sigs: None,
            ca: None,
            references: BTreeSet::new(),
        }
    }
}

impl StoreDb {
    /// Register a new valid path.
    ///
    /// Returns the database ID of the new path. References to paths not
    /// yet registered are skipped.
    pub fn register_valid_path(&mut self, params: &RegisterPathParams) -> Result<i64> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO ValidPaths (path, hash, registrationTime, deriver, narSize, ultimate, sigs, ca)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                params.path,
                params.hash,
                system_time_to_unix(params.registration_time),
                params.deriver,
                params.nar_size.map(|n| n as i64),
                if params.ultimate { 1 } else { 0 },
                params.sigs,
                params.ca,
            ],
        )?;

        let id = tx.last_insert_rowid();

        for reference in &params.references {
            let ref_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM ValidPaths WHERE path = ?1",
                    params![reference],
                    |row| row.get(0),
                )
                .ok();

            if let Some(ref_id) = ref_id {
                tx.execute(
                    "INSERT OR REPLACE INTO Refs (referrer, reference) VALUES (?1, ?2)",
                    params![id, ref_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Add a reference from one path to another.
    ///
    /// Both paths must already exist in the database.
    pub fn add_reference(&self, referrer_path: &str, reference_path: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO Refs (referrer, reference)
            SELECT r.id, f.id
            FROM ValidPaths r, ValidPaths f
            WHERE r.path = ?1 AND f.path = ?2
            "#,
            params![referrer_path, reference_path],
        )?;
        Ok(())
    }

    /// Register a derivation output.
    pub fn register_derivation_output(
        &self,
        drv_path: &str,
        output_name: &str,
        output_path: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO DerivationOutputs (drv, id, path)
            SELECT v.id, ?2, ?3
            FROM ValidPaths v
            WHERE v.path = ?1
            "#,
            params![drv_path, output_name, output_path],
        )?;
        Ok(())
    }

    /// Remove a path from the set of valid paths, erroring if any *other*
    /// valid path still references it.
    ///
    /// Self-references are allowed and removed along with the row; the
    /// path's own outgoing references and derivation outputs cascade.
    pub fn invalidate_path_checked(&self, path: &str) -> Result<()> {
        let referrers: Vec<String> = self
            .query_referrers(path)?
            .into_iter()
            .filter(|r| r != path)
            .collect();
        if !referrers.is_empty() {
            return Err(Error::PathInUse {
                path: path.to_owned(),
                referrers,
            });
        }

        let rows = self
            .conn
            .execute("DELETE FROM ValidPaths WHERE path = ?1", params![path])?;
        if rows == 0 {
            return Err(Error::PathNotFound(path.to_owned()));
        }
        Ok(())
    }
}
