// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the serial command bus.
//!
//! Two things are modelled here:
//!
//! - [`BusError`]: API misuse and lifecycle errors returned to callers
//!   (empty request, disposed channel, shut down scheduler, ...).
//! - [`FaultKind`]: the worker-side classification of an I/O failure,
//!   deciding between an immediate disconnect and a counted failure.
//!
//! A command that simply gets no answer is not an error: it resolves
//! with an absent response.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// BusError
// =============================================================================

/// Errors returned by channels, adapters, the registry and the priority manager.
#[derive(Debug, Error)]
pub enum BusError {
    /// A command was created with an empty request.
    #[error("Command request must not be empty")]
    EmptyRequest,

    /// The channel has been closed and no longer accepts commands.
    #[error("Channel {port} has been disposed")]
    Disposed {
        /// Port name.
        port: String,
    },

    /// The channel was never opened.
    #[error("Channel {port} has not been opened")]
    NotOpened {
        /// Port name.
        port: String,
    },

    /// A read was requested without a preceding write.
    #[error("No buffered request for device {device}")]
    NoPendingRequest {
        /// Device name of the adapter.
        device: String,
    },

    /// A range passed to a buffer operation is out of bounds.
    #[error("Range {offset}..{offset}+{count} is out of bounds for {len} bytes")]
    OutOfRange {
        /// Start offset.
        offset: usize,
        /// Byte count.
        count: usize,
        /// Buffer length.
        len: usize,
    },

    /// Invalid line settings or tuning values.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Opening a port failed.
    #[error("Failed to open {port}: {source}")]
    PortOpen {
        /// Port name.
        port: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Enumerating system ports failed.
    #[error("Failed to enumerate serial ports: {source}")]
    Enumeration {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The worker thread could not be spawned.
    #[error("Failed to spawn worker for {port}: {source}")]
    Spawn {
        /// Port name.
        port: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The caller stopped waiting before the command resolved.
    #[error("Command was not resolved within {duration:?}")]
    WaitTimeout {
        /// How long the caller waited.
        duration: Duration,
    },

    /// The priority manager has been shut down.
    #[error("Priority manager has shut down")]
    Shutdown,
}

impl BusError {
    /// Creates a disposed error.
    pub fn disposed(port: impl Into<String>) -> Self {
        Self::Disposed { port: port.into() }
    }

    /// Creates a not-opened error.
    pub fn not_opened(port: impl Into<String>) -> Self {
        Self::NotOpened { port: port.into() }
    }

    /// Creates a no-pending-request error.
    pub fn no_pending_request(device: impl Into<String>) -> Self {
        Self::NoPendingRequest {
            device: device.into(),
        }
    }

    /// Creates an invalid settings error.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    /// Creates a port open error.
    pub fn port_open(port: impl Into<String>, source: io::Error) -> Self {
        Self::PortOpen {
            port: port.into(),
            source,
        }
    }

    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BusError::PortOpen { source, .. } | BusError::Enumeration { source } => {
                FaultKind::classify(source).is_transient()
            }
            BusError::WaitTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            BusError::EmptyRequest | BusError::OutOfRange { .. } => "request",
            BusError::Disposed { .. } | BusError::NotOpened { .. } => "lifecycle",
            BusError::NoPendingRequest { .. } => "adapter",
            BusError::InvalidSettings(_) => "settings",
            BusError::PortOpen { .. } | BusError::Enumeration { .. } | BusError::Spawn { .. } => "io",
            BusError::WaitTimeout { .. } => "timeout",
            BusError::Shutdown => "priority",
        }
    }
}

// =============================================================================
// FaultKind
// =============================================================================

/// Classification of an I/O failure observed by a channel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The port itself is unusable (removed device, revoked access,
    /// broken pipe). The channel disconnects immediately.
    Critical,
    /// The operation failed but the port is still usable. Counts towards
    /// the consecutive failure threshold.
    Transient,
}

impl FaultKind {
    /// Classifies an I/O error.
    pub fn classify(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                FaultKind::Transient
            }
            _ => FaultKind::Critical,
        }
    }

    /// Returns `true` for [`FaultKind::Critical`].
    pub const fn is_critical(&self) -> bool {
        matches!(self, FaultKind::Critical)
    }

    /// Returns `true` for [`FaultKind::Transient`].
    pub const fn is_transient(&self) -> bool {
        matches!(self, FaultKind::Transient)
    }
}

// =============================================================================
// Tests
// =============================================================================
