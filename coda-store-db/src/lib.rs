// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! SQLite database interface for store metadata.
//!
//! The garbage collector consumes a small query surface from this crate:
//! path validity, the reference graph in both directions, the
//! derivation/output relation, NAR sizes, checked invalidation, a
//! topological sort of path sets, and `VACUUM`.
//!
//! # Example
//!
//! ```ignore
//! use coda_store_db::{OpenMode, StoreDb};
//!
//! let db = StoreDb::open("/nix/var/nix/db/db.sqlite", OpenMode::ReadWrite)?;
//! if db.is_valid_path("/nix/store/...")? {
//!     println!("referrers: {:?}", db.query_referrers("/nix/store/...")?);
//! }
//! ```

mod connection;
mod error;
mod query;
mod schema;
mod types;
mod write;

pub use connection::{OpenMode, StoreDb};
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use types::*;
pub use write::RegisterPathParams;
