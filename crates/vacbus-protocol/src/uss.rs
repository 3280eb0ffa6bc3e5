// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! USS telegram framing for the turbo pump drive.
//!
//! Telegrams have a fixed length of 24 bytes:
//!
//! ```text
//! offset  0     1     2     3..4  5     6     7..10  11..22        23
//!       ┌─────┬─────┬─────┬─────┬─────┬─────┬──────┬─────────────┬─────┐
//!       │ STX │ LGE │ ADR │ PKE │ rsv │ IND │ PWE  │ PZD1..PZD6  │ BCC │
//!       └─────┴─────┴─────┴─────┴─────┴─────┴──────┴─────────────┴─────┘
//! ```
//!
//! `LGE` counts the bytes following it (22). Multi-byte fields are
//! big-endian. `BCC` is the XOR of the 23 preceding bytes.
//!
//! The upper nibble of `PKE` carries the access type, the lower 11 bits
//! the parameter number. `PZD1` carries the control word in requests and
//! the status word in responses.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Start-of-text byte.
pub const STX: u8 = 0x02;

/// Length byte: number of bytes after `LGE`.
pub const LGE: u8 = 0x16;

/// Total telegram length.
pub const TELEGRAM_LEN: usize = 24;

/// Number of process data words.
pub const PZD_WORDS: usize = 6;

/// Largest parameter number encodable in `PKE`.
pub const MAX_PARAMETER: u16 = 0x07FF;

/// Computes the block check character (XOR of all bytes).
pub fn bcc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc ^ byte)
}

/// Returns `true` if `frame` is a well-formed telegram with a correct BCC.
pub fn validate(frame: &[u8]) -> bool {
    check(frame).is_ok()
}

fn check(frame: &[u8]) -> ProtocolResult<()> {
    if frame.len() != TELEGRAM_LEN {
        return Err(ProtocolError::LengthMismatch {
            expected: TELEGRAM_LEN,
            actual: frame.len(),
        });
    }

    if frame[0] != STX || frame[1] != LGE {
        return Err(ProtocolError::InvalidHeader {
            stx: frame[0],
            lge: frame[1],
        });
    }

    let computed = bcc(&frame[..TELEGRAM_LEN - 1]);
    let received = frame[TELEGRAM_LEN - 1];
    if computed != received {
        return Err(ProtocolError::BccMismatch { computed, received });
    }

    Ok(())
}

// =============================================================================
// AccessType
// =============================================================================

/// Parameter access requested by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// No parameter access; process data only.
    #[default]
    None,
    /// Read a parameter value.
    Read,
    /// Write a 16-bit parameter value.
    Write16,
    /// Write a 32-bit parameter value.
    Write32,
}

impl AccessType {
    /// Returns the `PKE` nibble for this access type.
    pub const fn nibble(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write16 => 2,
            Self::Write32 => 3,
        }
    }
}

// =============================================================================
// UssTelegram
// =============================================================================

/// A decoded USS telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UssTelegram {
    /// Drive address.
    pub address: u8,
    /// Parameter identifier (access nibble + parameter number).
    pub pke: u16,
    /// Parameter index.
    pub index: u8,
    /// Parameter value.
    pub pwe: u32,
    /// Process data words.
    pub pzd: [u16; PZD_WORDS],
}

impl UssTelegram {
    /// Creates an empty telegram for `address`.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Creates a parameter read request.
    pub fn read_parameter(address: u8, parameter: u16, index: u8) -> ProtocolResult<Self> {
        Self::new(address).with_parameter(AccessType::Read, parameter, index, 0)
    }

    /// Creates a 16-bit parameter write request.
    pub fn write_parameter16(address: u8, parameter: u16, index: u8, value: u16) -> ProtocolResult<Self> {
        Self::new(address).with_parameter(AccessType::Write16, parameter, index, u32::from(value))
    }

    /// Creates a 32-bit parameter write request.
    pub fn write_parameter32(address: u8, parameter: u16, index: u8, value: u32) -> ProtocolResult<Self> {
        Self::new(address).with_parameter(AccessType::Write32, parameter, index, value)
    }

    /// Sets the parameter channel.
    pub fn with_parameter(
        mut self,
        access: AccessType,
        parameter: u16,
        index: u8,
        value: u32,
    ) -> ProtocolResult<Self> {
        if parameter > MAX_PARAMETER {
            return Err(ProtocolError::invalid_request(format!(
                "parameter number {} exceeds {}",
                parameter, MAX_PARAMETER
            )));
        }

        self.pke = (u16::from(access.nibble()) << 12) | parameter;
        self.index = index;
        self.pwe = value;
        Ok(self)
    }

    /// Sets the control word (PZD1).
    pub fn with_control_word(mut self, control: u16) -> Self {
        self.pzd[0] = control;
        self
    }

    /// Returns the access nibble of `PKE`.
    pub fn access_code(&self) -> u8 {
        (self.pke >> 12) as u8
    }

    /// Returns the parameter number of `PKE`.
    pub fn parameter_number(&self) -> u16 {
        self.pke & MAX_PARAMETER
    }

    /// Returns the status word (PZD1 of a response).
    pub fn status_word(&self) -> u16 {
        self.pzd[0]
    }

    /// Encodes the telegram including BCC.
    pub fn encode(&self) -> [u8; TELEGRAM_LEN] {
        let mut frame = [0u8; TELEGRAM_LEN];
        frame[0] = STX;
        frame[1] = LGE;
        frame[2] = self.address;
        frame[3..5].copy_from_slice(&self.pke.to_be_bytes());
        frame[6] = self.index;
        frame[7..11].copy_from_slice(&self.pwe.to_be_bytes());
        for (i, word) in self.pzd.iter().enumerate() {
            let offset = 11 + i * 2;
            frame[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
        }
        frame[TELEGRAM_LEN - 1] = bcc(&frame[..TELEGRAM_LEN - 1]);
        frame
    }

    /// Decodes and verifies a telegram.
    pub fn decode(frame: &[u8]) -> ProtocolResult<Self> {
        check(frame)?;

        let mut pzd = [0u16; PZD_WORDS];
        for (i, word) in pzd.iter_mut().enumerate() {
            let offset = 11 + i * 2;
            *word = u16::from_be_bytes([frame[offset], frame[offset + 1]]);
        }

        Ok(Self {
            address: frame[2],
            pke: u16::from_be_bytes([frame[3], frame[4]]),
            index: frame[6],
            pwe: u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]),
            pzd,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
