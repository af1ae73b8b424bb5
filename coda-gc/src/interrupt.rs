// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Cooperative cancellation for long collection cycles.
//!
//! The collector checks this flag at the head of every per-path
//! iteration. The embedding process decides what sets it (typically a
//! SIGINT/SIGTERM handler); an interrupted cycle unwinds through RAII
//! lock guards, leaving only state a later cycle reclaims on its own
//! (renamed `-gc-<pid>` directories show up as invalid entries).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GcError, Result};

/// A shared interruption flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption. Safe to call from a signal handler thread.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if interruption was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(GcError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_until_set() {
        let interrupt = Interrupt::new();
        assert!(interrupt.check().is_ok());

        let clone = interrupt.clone();
        clone.set();
        assert!(matches!(interrupt.check(), Err(GcError::Interrupted)));
    }
}
