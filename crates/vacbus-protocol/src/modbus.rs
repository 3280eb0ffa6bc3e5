// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus RTU framing.
//!
//! Frame layout:
//!
//! ```text
//! [slave id][function code][payload ...][CRC16 lo][CRC16 hi]
//! ```
//!
//! The CRC is the standard Modbus CRC16 (reflected polynomial `0xA001`,
//! initial value `0xFFFF`) over every byte except the CRC itself, appended
//! little-endian.
//!
//! # Examples
//!
//! ```
//! use vacbus_protocol::modbus::{self, ModbusRequest};
//!
//! let request = ModbusRequest::read_holding_registers(1, 0x0000, 1).unwrap();
//! assert_eq!(request.encode(), vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
//! assert_eq!(request.expected_response_length(), 7);
//!
//! assert!(modbus::validate(&[0x01, 0x03, 0x02, 0x00, 0x00, 0xB8, 0x44]));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Smallest possible RTU frame: slave id, function code and CRC.
pub const MIN_FRAME_LEN: usize = 4;

/// Length of an exception response frame.
pub const EXCEPTION_FRAME_LEN: usize = 5;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum registers per read request (FC 03/04).
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers per write request (FC 16).
pub const MAX_WRITE_REGISTERS: u16 = 123;

// =============================================================================
// CRC16
// =============================================================================

/// Computes the Modbus CRC16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the CRC16 of `frame` to it, low byte first.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Checks the trailing CRC of a complete frame.
pub fn check_crc(frame: &[u8]) -> ProtocolResult<()> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::TooShort {
            expected: MIN_FRAME_LEN,
            actual: frame.len(),
        });
    }

    let (body, tail) = frame.split_at(frame.len() - 2);
    let computed = crc16(body);
    let received = u16::from_le_bytes([tail[0], tail[1]]);

    if computed == received {
        Ok(())
    } else {
        Err(ProtocolError::CrcMismatch { computed, received })
    }
}

/// Returns `true` if `frame` is long enough and carries a correct CRC.
pub fn validate(frame: &[u8]) -> bool {
    check_crc(frame).is_ok()
}

/// Returns `true` if `frame` is a checksum-correct answer from `slave_id`
/// whose function code is one of `function_codes`, either as a normal
/// response or as an exception response (code with bit 0x80 set).
///
/// Both forms prove a device is present on the line.
pub fn answers(frame: &[u8], slave_id: u8, function_codes: &[u8]) -> bool {
    if !validate(frame) || frame[0] != slave_id {
        return false;
    }

    let code = frame[1];
    let base = code & !EXCEPTION_FLAG;
    if !function_codes.contains(&base) {
        return false;
    }

    if code & EXCEPTION_FLAG != 0 {
        frame.len() == EXCEPTION_FRAME_LEN
    } else {
        true
    }
}

// =============================================================================
// FunctionCode
// =============================================================================

/// Function codes the bus drivers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCode {
    /// Read holding registers (FC 03).
    ReadHoldingRegisters,
    /// Read input registers (FC 04).
    ReadInputRegisters,
    /// Write multiple registers (FC 16).
    WriteMultipleRegisters,
}

impl FunctionCode {
    /// Returns the wire code.
    pub const fn code(&self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    /// Returns the code a device uses when answering with an exception.
    pub const fn exception_code(&self) -> u8 {
        self.code() | EXCEPTION_FLAG
    }

    /// Parses a wire code, ignoring the exception flag.
    pub fn from_code(code: u8) -> Option<Self> {
        match code & !EXCEPTION_FLAG {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Returns `true` for read functions.
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::ReadHoldingRegisters | Self::ReadInputRegisters)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadHoldingRegisters => "read_holding_registers",
            Self::ReadInputRegisters => "read_input_registers",
            Self::WriteMultipleRegisters => "write_multiple_registers",
        };
        write!(f, "{} (FC {:02})", name, self.code())
    }
}

// =============================================================================
// ModbusRequest
// =============================================================================

/// A Modbus RTU request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    /// Target slave id.
    pub slave_id: u8,
    /// Function code.
    pub function: FunctionCode,
    /// Starting register address.
    pub address: u16,
    /// Register count.
    pub quantity: u16,
    /// Values for write requests (empty for reads).
    pub values: Vec<u16>,
}

impl ModbusRequest {
    /// Builds a read holding registers request (FC 03).
    pub fn read_holding_registers(slave_id: u8, address: u16, quantity: u16) -> ProtocolResult<Self> {
        Self::read(slave_id, FunctionCode::ReadHoldingRegisters, address, quantity)
    }

    /// Builds a read input registers request (FC 04).
    pub fn read_input_registers(slave_id: u8, address: u16, quantity: u16) -> ProtocolResult<Self> {
        Self::read(slave_id, FunctionCode::ReadInputRegisters, address, quantity)
    }

    fn read(slave_id: u8, function: FunctionCode, address: u16, quantity: u16) -> ProtocolResult<Self> {
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(ProtocolError::invalid_request(format!(
                "read quantity must be 1..={}, got {}",
                MAX_READ_REGISTERS, quantity
            )));
        }

        Ok(Self {
            slave_id,
            function,
            address,
            quantity,
            values: Vec::new(),
        })
    }

    /// Builds a write multiple registers request (FC 16).
    pub fn write_multiple_registers(slave_id: u8, address: u16, values: &[u16]) -> ProtocolResult<Self> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ProtocolError::invalid_request(format!(
                "write quantity must be 1..={}, got {}",
                MAX_WRITE_REGISTERS,
                values.len()
            )));
        }

        Ok(Self {
            slave_id,
            function: FunctionCode::WriteMultipleRegisters,
            address,
            quantity: values.len() as u16,
            values: values.to_vec(),
        })
    }

    /// Encodes the request into a complete frame including CRC.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(9 + self.values.len() * 2);
        frame.push(self.slave_id);
        frame.push(self.function.code());
        frame.extend_from_slice(&self.address.to_be_bytes());
        frame.extend_from_slice(&self.quantity.to_be_bytes());

        if self.function == FunctionCode::WriteMultipleRegisters {
            frame.push((self.values.len() * 2) as u8);
            for value in &self.values {
                frame.extend_from_slice(&value.to_be_bytes());
            }
        }

        append_crc(&mut frame);
        frame
    }

    /// Returns the length of a normal (non-exception) response.
    ///
    /// Reads answer with `slave, fc, byte count, data, crc`; FC 16 echoes
    /// `slave, fc, address, quantity, crc`.
    pub fn expected_response_length(&self) -> usize {
        if self.function.is_read() {
            5 + self.quantity as usize * 2
        } else {
            8
        }
    }

    /// Parses a response to this request.
    pub fn parse_response(&self, frame: &[u8]) -> ProtocolResult<ModbusResponse> {
        parse_response(frame, self.slave_id, self.function)
    }
}

// =============================================================================
// ModbusResponse
// =============================================================================

/// A parsed, checksum-verified Modbus response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// Register values returned by FC 03/04.
    Registers {
        /// Responding slave.
        slave_id: u8,
        /// Function that was answered.
        function: FunctionCode,
        /// Register values.
        values: Vec<u16>,
    },
    /// Acknowledgement of FC 16.
    WriteAck {
        /// Responding slave.
        slave_id: u8,
        /// Echoed start address.
        address: u16,
        /// Echoed register count.
        quantity: u16,
    },
}

impl ModbusResponse {
    /// Returns the register values, if this is a read response.
    pub fn registers(&self) -> Option<&[u16]> {
        match self {
            Self::Registers { values, .. } => Some(values),
            Self::WriteAck { .. } => None,
        }
    }
}

/// Parses and verifies a response frame.
///
/// An exception response is reported as [`ProtocolError::Exception`].
pub fn parse_response(frame: &[u8], slave_id: u8, function: FunctionCode) -> ProtocolResult<ModbusResponse> {
    check_crc(frame)?;

    if frame[0] != slave_id {
        return Err(ProtocolError::UnexpectedSlave {
            expected: slave_id,
            actual: frame[0],
        });
    }

    let code = frame[1];
    if code == function.exception_code() {
        if frame.len() != EXCEPTION_FRAME_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: EXCEPTION_FRAME_LEN,
                actual: frame.len(),
            });
        }
        return Err(ProtocolError::Exception {
            function_code: function.code(),
            exception_code: frame[2],
        });
    }

    if code != function.code() {
        return Err(ProtocolError::UnexpectedFunction {
            expected: function.code(),
            actual: code,
        });
    }

    if function.is_read() {
        if frame.len() < 5 {
            return Err(ProtocolError::TooShort {
                expected: 5,
                actual: frame.len(),
            });
        }
        let byte_count = frame[2] as usize;
        let expected = 5 + byte_count;
        if frame.len() != expected || byte_count % 2 != 0 {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: frame.len(),
            });
        }

        let values = frame[3..3 + byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Ok(ModbusResponse::Registers {
            slave_id,
            function,
            values,
        })
    } else {
        if frame.len() != 8 {
            return Err(ProtocolError::LengthMismatch {
                expected: 8,
                actual: frame.len(),
            });
        }

        Ok(ModbusResponse::WriteAck {
            slave_id,
            address: u16::from_be_bytes([frame[2], frame[3]]),
            quantity: u16::from_be_bytes([frame[4], frame[5]]),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
