// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Store-path domain types shared by the coda store stack.

pub mod base32;
pub mod store_path;

pub use base32::nix_base32_encode;
pub use store_path::{StoreDir, StorePath, StorePathError};
