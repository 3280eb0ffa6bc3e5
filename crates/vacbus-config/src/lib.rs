// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus-config
//!
//! Configuration for the vacbus serial command bus: worker timing,
//! priority scheduling, auto-detection options and static device
//! bindings. Files may be YAML, TOML or JSON; durations use humantime
//! notation (`"50ms"`, `"3s"`).

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{DetectionConfig, DeviceBinding, VacbusConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
