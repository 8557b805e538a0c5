// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # neurite-observability
//!
//! Logging setup shared by Neurite binaries, tests and benches, with
//! per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: per-run log folders with daily rotation

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known Neurite crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "neurite",
    "neurite-config",
    "neurite-npu-neural",
    "neurite-npu-runtime",
    "neurite-npu-cycle-engine",
];
