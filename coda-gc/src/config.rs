// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GcError, IoContext, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GcConfig {
    /// Path to the store directory
    pub store_dir: PathBuf,

    /// State directory holding the GC lock, roots and temp-roots trees,
    /// and the metadata database
    pub state_dir: PathBuf,

    /// Directory the default runtime root finder is installed under
    pub libexec_dir: PathBuf,

    /// Derivations keep their outputs alive.
    ///
    /// Matches the `gc-keep-outputs` setting: a derivation is only
    /// garbage once every valid output of it is.
    pub keep_outputs: bool,

    /// Outputs keep their derivers alive.
    ///
    /// Matches `gc-keep-derivations`. Together with `keep_outputs` this
    /// makes liveness cyclic, which the collector handles by deciding
    /// whole strongly connected components at once.
    pub keep_derivations: bool,

    /// After registering a root, re-scan and warn if the scanner would
    /// not find it. Can be slow with many roots.
    pub check_root_reachability: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("/nix/store"),
            state_dir: PathBuf::from("/nix/var/nix"),
            libexec_dir: PathBuf::from("/usr/libexec"),
            keep_outputs: false,
            keep_derivations: true,
            check_root_reachability: false,
        }
    }
}

impl GcConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .io_context(|| format!("Failed to read config file at {}", path.display()))?;
        let config: GcConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Path of the metadata database under the state directory.
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("db/db.sqlite")
    }

    /// Validate paths that must be absolute.
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, path) in [("store_dir", &self.store_dir), ("state_dir", &self.state_dir)] {
            if !path.is_absolute() {
                return Err(GcError::Config(format!(
                    "{name} '{}' must be an absolute path",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GcConfig::default();
        assert_eq!(config.store_dir, PathBuf::from("/nix/store"));
        assert!(config.keep_derivations);
        assert!(!config.keep_outputs);
        assert_eq!(config.db_path(), PathBuf::from("/nix/var/nix/db/db.sqlite"));
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gc.toml");
        std::fs::write(
            &path,
            r#"
            store_dir = "/data/store"
            keep_outputs = true
            "#,
        )
        .unwrap();

        let config = GcConfig::from_file(&path).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/data/store"));
        assert!(config.keep_outputs);
        // Unset fields fall back to defaults
        assert!(config.keep_derivations);
        assert_eq!(config.state_dir, PathBuf::from("/nix/var/nix"));
    }
}
