// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Detection errors.
//!
//! A device that does not answer is not an error; it is reported in
//! [`DetectionResult::undetected`](crate::DetectionResult::undetected).

use std::io;

use thiserror::Error;
use vacbus_protocol::ProtocolError;

/// Result type alias for detection.
pub type DetectResult<T> = Result<T, DetectError>;

/// Errors raised while building a catalogue or running detection.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Two probes share the same `(baud, parity)` fingerprint.
    #[error("Probes {first} and {second} share fingerprint {baud_rate}/{parity}")]
    DuplicateFingerprint {
        /// Device of the earlier probe.
        first: String,
        /// Device of the later probe.
        second: String,
        /// Baud rate.
        baud_rate: u32,
        /// Parity character.
        parity: char,
    },

    /// Two probes share the same device name.
    #[error("Duplicate probe for device {0}")]
    DuplicateDevice(String),

    /// A probe packet could not be built.
    #[error("Invalid probe packet: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listing the system's serial ports failed.
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(#[source] io::Error),

    /// The blocking detection task failed.
    #[error("Detection task failed: {0}")]
    Task(String),
}
