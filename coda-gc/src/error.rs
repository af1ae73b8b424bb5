// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GcError>;

#[derive(Error, Debug)]
pub enum GcError {
    #[error("Store database error: {0}")]
    StoreDb(#[from] coda_store_db::Error),

    #[error("{0}")]
    StorePath(#[from] coda_store_core::StorePathError),

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot delete path '{0}' since it is still alive")]
    StillAlive(PathBuf),

    #[error("creating a garbage collector root ({0}) inside the store is forbidden")]
    RootInStore(PathBuf),

    #[error("cannot create symlink '{0}'; already exists")]
    RootLinkExists(PathBuf),

    #[error("path '{path}' is not a valid garbage collector root; it's not in the directory '{roots_dir}'")]
    RootOutsideRootsDir { path: PathBuf, roots_dir: PathBuf },

    #[error("root finder '{program}' failed: {status}")]
    RootFinderFailed { program: PathBuf, status: String },

    #[error("interrupted by the user")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GcError {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }
}

/// Helper trait for adding context to IO errors
pub trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| GcError::io(f(), e))
    }
}
