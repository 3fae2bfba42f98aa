// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # trial-observability
//!
//! Logging initialisation for trial-sdk applications, with per-crate debug
//! flag support.
//!
//! ## Features
//! - `file-logging`: daily-rotated log file next to the console output

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "trial-sdk",
    "trial-session",
    "trial-config",
    "trial-observability",
];
