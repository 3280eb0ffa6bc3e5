// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Detection probes.
//!
//! A [`Probe`] identifies one device by the line settings it answers at,
//! a request packet, and a validator for the answer. A probe may carry a
//! fallback packet that is tried only when the primary one gets no valid
//! response.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vacbus_core::PortSettings;
use vacbus_protocol::{modbus, uss, FunctionCode};

// =============================================================================
// Protocol
// =============================================================================

/// Wire protocol spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Modbus RTU.
    ModbusRtu,
    /// USS telegrams.
    Uss,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModbusRtu => write!(f, "modbus-rtu"),
            Self::Uss => write!(f, "uss"),
        }
    }
}

// =============================================================================
// ResponseValidator
// =============================================================================

/// Decides whether a response proves the device is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseValidator {
    /// A CRC-correct Modbus frame from `slave_id` with one of the
    /// `function_codes`, or its exception response.
    Modbus {
        /// Expected slave id.
        slave_id: u8,
        /// Accepted function codes (without the exception flag).
        function_codes: Vec<u8>,
    },
    /// A BCC-correct 24-byte USS telegram.
    Uss,
}

impl ResponseValidator {
    /// Modbus validator for a single function code.
    pub fn modbus(slave_id: u8, function_code: u8) -> Self {
        Self::Modbus {
            slave_id,
            function_codes: vec![function_code],
        }
    }

    /// Protocol this validator checks.
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Modbus { .. } => Protocol::ModbusRtu,
            Self::Uss => Protocol::Uss,
        }
    }

    /// Returns `true` if `response` proves the device is present.
    ///
    /// Bytes trailing a complete frame (line noise after the answer) are
    /// tolerated.
    pub fn matches(&self, response: &[u8]) -> bool {
        match self {
            Self::Modbus {
                slave_id,
                function_codes,
            } => {
                if modbus::answers(response, *slave_id, function_codes) {
                    return true;
                }
                frame_prefix(response)
                    .is_some_and(|frame| modbus::answers(frame, *slave_id, function_codes))
            }
            Self::Uss => {
                response.len() >= uss::TELEGRAM_LEN && uss::validate(&response[..uss::TELEGRAM_LEN])
            }
        }
    }
}

/// Length-delimited prefix of a Modbus response: exception frames are
/// 5 bytes, write acknowledgements 8, read responses carry their byte
/// count in the third byte.
fn frame_prefix(response: &[u8]) -> Option<&[u8]> {
    if response.len() < modbus::MIN_FRAME_LEN {
        return None;
    }
    let code = response[1];
    let len = if code & modbus::EXCEPTION_FLAG != 0 {
        modbus::EXCEPTION_FRAME_LEN
    } else if code == FunctionCode::WriteMultipleRegisters.code() {
        8
    } else {
        5 + usize::from(response[2])
    };
    response.get(..len)
}

// =============================================================================
// ProbePacket
// =============================================================================

/// A request packet and the validator for its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePacket {
    /// Bytes to send.
    pub request: Vec<u8>,
    /// Expected length of a normal answer, `0` if unknown.
    pub expected_len: usize,
    /// Answer validator.
    pub validator: ResponseValidator,
}

impl ProbePacket {
    /// Modbus packet built from `request`, accepting its function code.
    pub fn modbus(request: &modbus::ModbusRequest) -> Self {
        Self {
            request: request.encode(),
            expected_len: request.expected_response_length(),
            validator: ResponseValidator::modbus(request.slave_id, request.function.code()),
        }
    }

    /// USS packet built from `telegram`.
    pub fn uss(telegram: &uss::UssTelegram) -> Self {
        Self {
            request: telegram.encode().to_vec(),
            expected_len: uss::TELEGRAM_LEN,
            validator: ResponseValidator::Uss,
        }
    }
}

/// Which packet of a probe identified the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketVariant {
    /// The primary packet.
    Primary,
    /// The fallback packet.
    Fallback,
}

// =============================================================================
// Probe
// =============================================================================

/// Fingerprint of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Device name.
    pub device: String,
    /// Line settings the device answers at.
    pub settings: PortSettings,
    /// First packet to try.
    pub primary: ProbePacket,
    /// Packet tried only when the primary one gets no valid answer.
    pub fallback: Option<ProbePacket>,
    /// Overrides the detector's default response timeout.
    pub timeout: Option<Duration>,
}

impl Probe {
    /// Creates a probe without fallback.
    pub fn new(device: impl Into<String>, settings: PortSettings, primary: ProbePacket) -> Self {
        Self {
            device: device.into(),
            settings,
            primary,
            fallback: None,
            timeout: None,
        }
    }

    /// Sets the fallback packet.
    pub fn with_fallback(mut self, fallback: ProbePacket) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sets the response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Protocol of the primary packet.
    pub fn protocol(&self) -> Protocol {
        self.primary.validator.protocol()
    }

    /// Packets in the order they are tried.
    pub fn packets(&self) -> impl Iterator<Item = (PacketVariant, &ProbePacket)> {
        std::iter::once((PacketVariant::Primary, &self.primary))
            .chain(self.fallback.iter().map(|packet| (PacketVariant::Fallback, packet)))
    }

    /// Packet sent as `variant`, if the probe has one.
    pub fn packet(&self, variant: PacketVariant) -> Option<&ProbePacket> {
        self.packets()
            .find(|(candidate, _)| *candidate == variant)
            .map(|(_, packet)| packet)
    }

    /// `(baud, parity)` pair identifying this probe.
    pub fn fingerprint(&self) -> (u32, vacbus_core::Parity) {
        (self.settings.baud_rate, self.settings.parity)
    }
}

// =============================================================================
// Tests
// =============================================================================
