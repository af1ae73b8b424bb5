// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! The store directory and the paths that live directly below it.
//!
//! A [`StorePath`] is the full filesystem path of one immutable top-level
//! store entry. Validity (presence in the metadata database) is a separate
//! property checked against [`coda-store-db`]; this module only enforces
//! shape: absolute, UTF-8, a direct child of the store directory, with a
//! non-empty name.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Filename extension that marks a store path as a derivation.
const DRV_EXTENSION: &str = ".drv";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StorePathError {
    #[error("store directory '{0}' is not an absolute path")]
    StoreDirNotAbsolute(PathBuf),

    #[error("path '{path}' is not in the store directory '{store_dir}'")]
    NotInStore { path: PathBuf, store_dir: PathBuf },

    #[error("path '{0}' is not a valid store path")]
    Malformed(PathBuf),

    #[error("path '{0}' is not valid UTF-8")]
    NotUtf8(PathBuf),
}

/// The store directory, e.g. `/nix/store`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    /// Create a store directory handle. The path must be absolute.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorePathError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(StorePathError::StoreDirNotAbsolute(path.to_owned()));
        }
        Ok(Self {
            path: path.to_owned(),
        })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The hard-link deduplication pool, `<store>/.links`.
    pub fn links_dir(&self) -> PathBuf {
        self.path.join(".links")
    }

    /// Whether `path` lies inside the store directory (at any depth).
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path) && path != self.path
    }

    /// Truncate a path inside the store to its top-level store entry.
    ///
    /// `/nix/store/abc-foo/bin/sh` becomes the store path
    /// `/nix/store/abc-foo`. Errors if `path` is not inside the store.
    pub fn to_store_path(&self, path: &Path) -> Result<StorePath, StorePathError> {
        let rest = path
            .strip_prefix(&self.path)
            .map_err(|_| StorePathError::NotInStore {
                path: path.to_owned(),
                store_dir: self.path.clone(),
            })?;
        let name = match rest.components().next() {
            Some(Component::Normal(name)) => name,
            _ => return Err(StorePathError::Malformed(path.to_owned())),
        };
        self.parse(&self.path.join(name))
    }

    /// Parse a full path as a direct child of the store directory.
    pub fn parse(&self, path: &Path) -> Result<StorePath, StorePathError> {
        match path.parent() {
            Some(parent) if parent == self.path => {}
            _ => {
                return Err(StorePathError::NotInStore {
                    path: path.to_owned(),
                    store_dir: self.path.clone(),
                })
            }
        }
        let s = path
            .to_str()
            .ok_or_else(|| StorePathError::NotUtf8(path.to_owned()))?;
        match path.file_name() {
            Some(name) if !name.is_empty() => {}
            _ => return Err(StorePathError::Malformed(path.to_owned())),
        }
        Ok(StorePath {
            path: s.to_owned(),
        })
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A full store path, e.g. `/nix/store/abc-foo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    path: String,
}

impl StorePath {
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.path)
    }

    pub fn into_path_buf(self) -> PathBuf {
        PathBuf::from(self.path)
    }

    /// Structural predicate: derivations are recognised by name alone.
    pub fn is_derivation(&self) -> bool {
        self.path.ends_with(DRV_EXTENSION)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<Path> for StorePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StoreDir {
        StoreDir::new("/nix/store").unwrap()
    }

    #[test]
    fn test_relative_store_dir_rejected() {
        assert_eq!(
            StoreDir::new("nix/store"),
            Err(StorePathError::StoreDirNotAbsolute("nix/store".into()))
        );
    }

    #[test]
    fn test_parse_direct_child() {
        let sp = store().parse(Path::new("/nix/store/abc-foo")).unwrap();
        assert_eq!(sp.as_str(), "/nix/store/abc-foo");
        assert!(!sp.is_derivation());
    }

    #[test]
    fn test_parse_rejects_nested_and_outside() {
        let store = store();
        assert!(store.parse(Path::new("/nix/store/abc-foo/bin")).is_err());
        assert!(store.parse(Path::new("/etc/passwd")).is_err());
        assert!(store.parse(Path::new("/nix/store")).is_err());
    }

    #[test]
    fn test_to_store_path_truncates() {
        let sp = store()
            .to_store_path(Path::new("/nix/store/abc-foo/bin/sh"))
            .unwrap();
        assert_eq!(sp.as_str(), "/nix/store/abc-foo");
    }

    #[test]
    fn test_contains() {
        let store = store();
        assert!(store.contains(Path::new("/nix/store/abc-foo")));
        assert!(store.contains(Path::new("/nix/store/abc-foo/bin")));
        assert!(!store.contains(Path::new("/nix/store")));
        assert!(!store.contains(Path::new("/nix/storeroom/x")));
    }

    #[test]
    fn test_is_derivation() {
        let store = store();
        let drv = store.parse(Path::new("/nix/store/abc-foo.drv")).unwrap();
        assert!(drv.is_derivation());
    }

    #[test]
    fn test_links_dir() {
        assert_eq!(store().links_dir(), PathBuf::from("/nix/store/.links"));
    }
}
