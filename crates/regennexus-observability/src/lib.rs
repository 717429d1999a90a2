// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! # regennexus-observability
//!
//! Logging setup shared by the registry server, the agent client and tests.
//!
//! Every crate logs through `tracing`; this crate installs the subscriber and
//! turns `--debug-<crate>` flags (or `REGENNEXUS_DEBUG`) into an `EnvFilter`.
//!
//! ## Features
//! - `file-logging`: rolling JSON log files next to the console output

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known RegenNexus crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "regennexus",
    "regennexus-config",
    "regennexus-protocol",
    "regennexus-registry",
    "regennexus-router",
    "regennexus-agent",
];
