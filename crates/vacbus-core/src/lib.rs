// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus-core
//!
//! Serial command bus for lab vacuum and thermal equipment.
//!
//! Several devices (turbo pump, dry pump, bath circulator, temperature
//! controller, I/O module) may share one RS-232/RS-485 line. This crate
//! serializes their traffic per physical port:
//!
//! - **Channel**: one worker thread per port, FIFO command queue, active
//!   response polling, failure classification and gated reconnect
//! - **Command**: request bytes plus a one-shot completion
//! - **Adapter**: `write`/`read` facade for drivers written against a
//!   dedicated port
//! - **Registry**: one channel per port name, aggregated connection events
//! - **Priority**: per-device execute/query scheduling with poller pause
//! - **Port**: serial I/O seam with a `serialport` backed provider
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vacbus_core::{BusTuning, ChannelRegistry, Parity, PortSettings};
//!
//! let registry = ChannelRegistry::with_system_ports(BusTuning::default());
//! let settings = PortSettings::new(38400, Parity::Even);
//! let pump = registry.create_communication_manager("/dev/ttyUSB0", &settings, "DryPump", Duration::from_millis(500));
//!
//! pump.connect().unwrap();
//! pump.set_expected_response_length(7);
//! pump.write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
//! let response = pump.read_all().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod port;
pub mod types;

// =============================================================================
// Execution Modules
// =============================================================================

pub mod channel;
pub mod command;
pub mod events;
pub mod transaction;

// =============================================================================
// Facade & Scheduling Modules
// =============================================================================

pub mod adapter;
pub mod priority;
pub mod registry;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::CommunicationAdapter;
pub use channel::{ChannelStatus, PortChannel};
pub use command::{Command, CommandHandle, Completion};
pub use error::{BusError, BusResult, FaultKind};
pub use events::{ConnectionEvent, ConnectionReason};
pub use port::{PortProvider, SerialIo, SystemPorts};
pub use priority::{PendingCounts, PollerControl, PriorityConfig, PriorityManager};
pub use registry::ChannelRegistry;
pub use types::{BusTuning, DataBits, Handshake, Parity, PortSettings, StopBits};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
