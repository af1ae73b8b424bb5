// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Read query operations for the store database.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::params;

use crate::connection::StoreDb;
use crate::error::Result;
use crate::types::{unix_to_system_time, ValidPathInfo};

impl StoreDb {
    /// Query path info by full store path.
    ///
    /// Returns `None` if the path is not in the database.
    pub fn query_path_info(&self, path: &str) -> Result<Option<ValidPathInfo>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, path, hash, registrationTime, deriver, narSize, ultimate, sigs, ca
            FROM ValidPaths
            WHERE path = ?1
            "#,
        )?;

        let info = stmt.query_row(params![path], |row| {
            Ok(ValidPathInfo {
                id: row.get(0)?,
                path: row.get(1)?,
                hash: row.get(2)?,
                registration_time: unix_to_system_time(row.get(3)?),
                deriver: row.get(4)?,
                nar_size: row.get::<_, Option<i64>>(5)?.map(|n| n as u64),
                ultimate: row.get::<_, Option<i32>>(6)?.unwrap_or(0) != 0,
                sigs: row.get(7)?,
                ca: row.get(8)?,
                references: BTreeSet::new(),
            })
        });

        match info {
            Ok(mut info) => {
                info.references = self.query_references_by_id(info.id)?;
                Ok(Some(info))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a store path is valid (exists in the database).
    pub fn is_valid_path(&self, path: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT 1 FROM ValidPaths WHERE path = ?1 LIMIT 1
            "#,
        )?;

        let exists = stmt.query_row(params![path], |_| Ok(())).is_ok();
        Ok(exists)
    }

    /// Get all paths referenced by a given path.
    pub fn query_references(&self, path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT v.path
            FROM Refs r
            JOIN ValidPaths v ON r.reference = v.id
            WHERE r.referrer = (SELECT id FROM ValidPaths WHERE path = ?1)
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![path])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    fn query_references_by_id(&self, id: i64) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT v.path
            FROM Refs r
            JOIN ValidPaths v ON r.reference = v.id
            WHERE r.referrer = ?1
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![id])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    /// Get all paths that reference a given path (reverse dependencies).
    pub fn query_referrers(&self, path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT v.path
            FROM Refs r
            JOIN ValidPaths v ON r.referrer = v.id
            WHERE r.reference = (SELECT id FROM ValidPaths WHERE path = ?1)
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![path])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    /// Get all valid derivations that list `output_path` as one of their
    /// outputs.
    pub fn query_valid_derivers(&self, output_path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT v.path
            FROM DerivationOutputs d
            JOIN ValidPaths v ON d.drv = v.id
            WHERE d.path = ?1
            "#,
        )?;

        let mut derivers = BTreeSet::new();
        let mut rows = stmt.query(params![output_path])?;
        while let Some(row) = rows.next()? {
            derivers.insert(row.get(0)?);
        }
        Ok(derivers)
    }

    /// Get the output paths a derivation is supposed to produce.
    ///
    /// The outputs need not be valid paths themselves.
    pub fn query_derivation_outputs(&self, drv_path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT d.path
            FROM DerivationOutputs d
            JOIN ValidPaths v ON d.drv = v.id
            WHERE v.path = ?1
            "#,
        )?;

        let mut outputs = BTreeSet::new();
        let mut rows = stmt.query(params![drv_path])?;
        while let Some(row) = rows.next()? {
            outputs.insert(row.get(0)?);
        }
        Ok(outputs)
    }

    /// Topologically sort a set of valid paths so that referrers precede
    /// the paths they reference.
    ///
    /// A path can only be physically removed after everything that names it
    /// is gone, so the collector deletes in exactly this order. Reference
    /// edges leaving the set are ignored; self-references are tolerated.
    pub fn topo_sort_paths(&self, paths: &BTreeSet<String>) -> Result<Vec<String>> {
        // References within the set only.
        let mut edges: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for p in paths {
            let refs = self
                .query_references(p)?
                .into_iter()
                .filter(|r| r != p && paths.contains(r))
                .collect();
            edges.insert(p.as_str(), refs);
        }

        let mut visited = BTreeSet::new();
        let mut sorted = Vec::with_capacity(paths.len());

        fn visit<'a>(
            p: &'a str,
            edges: &'a BTreeMap<&str, Vec<String>>,
            visited: &mut BTreeSet<&'a str>,
            sorted: &mut Vec<String>,
        ) {
            if !visited.insert(p) {
                return;
            }
            if let Some(refs) = edges.get(p) {
                for r in refs {
                    visit(r, edges, visited, sorted);
                }
            }
            sorted.push(p.to_owned());
        }

        for p in paths {
            visit(p, &edges, &mut visited, &mut sorted);
        }

        // Post-order puts references first; referrers must come first.
        sorted.reverse();
        Ok(sorted)
    }
}
