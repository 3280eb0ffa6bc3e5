// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus-detect
//!
//! Finds out which serial port hosts which device by probing each port
//! with per-device fingerprints: a `(baud, parity)` pair, a request
//! packet and a response validator.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vacbus_core::{BusTuning, SystemPorts};
//! use vacbus_detect::{Catalogue, DetectorOptions, PortDetector};
//!
//! let detector = PortDetector::new(
//!     Arc::new(SystemPorts::new()),
//!     Catalogue::builtin().unwrap(),
//!     DetectorOptions::default(),
//!     BusTuning::default(),
//! );
//! let result = detector.detect().unwrap();
//! for (port, device) in result.port_to_device() {
//!     println!("{port}: {device}");
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod detector;
pub mod error;
pub mod probe;

pub use catalog::{Catalogue, DeviceKind};
pub use detector::{Assignment, DetectionResult, DetectorOptions, PortDetector};
pub use error::{DetectError, DetectResult};
pub use probe::{PacketVariant, Probe, ProbePacket, Protocol, ResponseValidator};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
