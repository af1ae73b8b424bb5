// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Database row types for store metadata.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Information about a valid store path.
///
/// This represents a row from the ValidPaths table with its references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPathInfo {
    /// Database row ID
    pub id: i64,
    /// Full store path (e.g., /nix/store/xxx-name)
    pub path: String,
    /// Base16-encoded content hash
    pub hash: String,
    /// When this path was registered
    pub registration_time: SystemTime,
    /// Store path of the derivation that produced this (if any)
    pub deriver: Option<String>,
    /// Size of the NAR serialization; what the collector accounts for an
    /// invalidated directory before it is physically removed
    pub nar_size: Option<u64>,
    /// Whether this is an "ultimate" path (built locally, not substituted)
    pub ultimate: bool,
    /// Space-separated cryptographic signatures
    pub sigs: Option<String>,
    /// Content address assertion (if content-addressed)
    pub ca: Option<String>,
    /// Store paths that this path references (runtime dependencies)
    pub references: BTreeSet<String>,
}

pub(crate) fn unix_to_system_time(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-timestamp) as u64)
    }
}

pub(crate) fn system_time_to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_time_roundtrip() {
        let now = SystemTime::now();
        let unix = system_time_to_unix(now);
        let back = unix_to_system_time(unix);
        // Allow 1 second tolerance due to subsecond truncation
        let diff = now.duration_since(back).unwrap_or_default();
        assert!(diff.as_secs() <= 1);
    }
}
