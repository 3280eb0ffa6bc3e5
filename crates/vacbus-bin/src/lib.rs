// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus-bin
//!
//! Command line front end for the vacbus serial command bus.
//!
//! ```bash
//! # List serial ports
//! vacbus ports
//!
//! # Find out which device sits on which port
//! vacbus detect --format json
//!
//! # Open every channel and keep reporting every 5 seconds
//! vacbus -c /etc/vacbus/bench.yaml status --watch 5
//!
//! # Validate configuration
//! vacbus validate
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{BusRuntime, StatusReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
