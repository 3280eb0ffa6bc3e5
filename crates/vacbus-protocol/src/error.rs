// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Framing error types.
//!
//! Framing errors describe why a byte sequence is not a valid Modbus RTU
//! frame or USS telegram. They never describe transport failures; those
//! belong to the bus.

use thiserror::Error;

/// Result type alias for framing operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or parsing wire frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is shorter than the minimum for its protocol.
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Frame length does not match the length announced in its header.
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Modbus CRC16 did not match.
    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch {
        /// CRC computed over the frame body.
        computed: u16,
        /// CRC carried by the frame.
        received: u16,
    },

    /// USS block check character did not match.
    #[error("BCC mismatch: computed {computed:#04x}, received {received:#04x}")]
    BccMismatch {
        /// BCC computed over the telegram body.
        computed: u8,
        /// BCC carried by the telegram.
        received: u8,
    },

    /// Response came from an unexpected slave.
    #[error("Unexpected slave id: expected {expected}, got {actual}")]
    UnexpectedSlave {
        /// Expected slave id.
        expected: u8,
        /// Actual slave id.
        actual: u8,
    },

    /// Response carries an unexpected function code.
    #[error("Unexpected function code {actual:#04x} (expected {expected:#04x})")]
    UnexpectedFunction {
        /// Expected function code.
        expected: u8,
        /// Actual function code.
        actual: u8,
    },

    /// The device answered with a Modbus exception.
    #[error("Modbus exception {exception_code:#04x} for function {function_code:#04x}")]
    Exception {
        /// Function code of the request (without the 0x80 flag).
        function_code: u8,
        /// Exception code reported by the device.
        exception_code: u8,
    },

    /// Telegram header (STX/LGE) is not the expected one.
    #[error("Invalid telegram header: STX {stx:#04x}, LGE {lge:#04x}")]
    InvalidHeader {
        /// Start byte.
        stx: u8,
        /// Length byte.
        lge: u8,
    },

    /// A request could not be built from the given arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProtocolError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns `true` if the bytes were corrupted in transit.
    ///
    /// Checksum failures and truncated frames indicate line noise or an
    /// incomplete read, as opposed to a well-formed answer the caller did
    /// not expect.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::TooShort { .. }
                | Self::LengthMismatch { .. }
                | Self::CrcMismatch { .. }
                | Self::BccMismatch { .. }
        )
    }

    /// Returns `true` if this error still proves a device is listening.
    ///
    /// A Modbus exception response is a valid, checksum-correct frame.
    pub fn proves_presence(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::CrcMismatch {
            computed: 0x0a84,
            received: 0x0000,
        };
        assert_eq!(err.to_string(), "CRC mismatch: computed 0x0a84, received 0x0000");
    }

    #[test]
    fn test_classification() {
        assert!(ProtocolError::TooShort { expected: 4, actual: 1 }.is_corruption());
        assert!(!ProtocolError::TooShort { expected: 4, actual: 1 }.proves_presence());

        let exception = ProtocolError::Exception {
            function_code: 0x03,
            exception_code: 0x02,
        };
        assert!(exception.proves_presence());
        assert!(!exception.is_corruption());
    }
}
