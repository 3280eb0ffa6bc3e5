// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vacbus-protocol
//!
//! Wire framing for the two binary protocols carried by the vacbus serial
//! command bus:
//!
//! - **Modbus RTU**: dry pump, bath circulator, temperature controller and
//!   I/O module. CRC16 framing, request builders, response parsing.
//! - **USS**: turbo pump drive. Fixed 24-byte telegrams with XOR block
//!   check character.
//!
//! The bus itself only moves bytes; these helpers are used by device
//! drivers to produce request payloads and by port auto-detection to
//! validate fingerprint responses.
//!
//! ```
//! use vacbus_protocol::{modbus, uss};
//!
//! let request = modbus::ModbusRequest::read_holding_registers(1, 0, 1).unwrap();
//! assert!(modbus::validate(&request.encode()));
//!
//! let telegram = uss::UssTelegram::read_parameter(0, 3, 0).unwrap();
//! assert!(uss::validate(&telegram.encode()));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod modbus;
pub mod uss;

pub use error::{ProtocolError, ProtocolResult};
pub use modbus::{FunctionCode, ModbusRequest, ModbusResponse};
pub use uss::{AccessType, UssTelegram};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
