// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Probe catalogue.
//!
//! The built-in catalogue holds one probe per supported device, in the
//! order they are tried:
//!
//! | Device                | Baud  | Parity | Protocol   | Packet                          |
//! |-----------------------|-------|--------|------------|---------------------------------|
//! | TurboPump             | 19200 | Even   | USS        | read parameter 3                |
//! | DryPump               | 38400 | Even   | Modbus RTU | FC 03, register 0               |
//! | BathCirculator        | 9600  | Even   | Modbus RTU | FC 03, register 0               |
//! | TemperatureController | 19200 | None   | Modbus RTU | FC 04, register 0               |
//! | IoModule              | 9600  | None   | Modbus RTU | FC 03, register 0 (FC 04 fallback) |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vacbus_core::{Parity, PortSettings};
use vacbus_protocol::{ModbusRequest, UssTelegram};

use crate::error::{DetectError, DetectResult};
use crate::probe::{Probe, ProbePacket};

/// Modbus slave id of every catalogued Modbus device.
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// USS address of the turbo pump drive.
pub const TURBO_PUMP_ADDRESS: u8 = 0;

/// USS parameter read by the turbo pump probe.
pub const TURBO_PUMP_PROBE_PARAMETER: u16 = 3;

// =============================================================================
// DeviceKind
// =============================================================================

/// Devices with a built-in probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Turbomolecular pump drive (USS).
    TurboPump,
    /// Dry backing pump.
    DryPump,
    /// Bath circulator.
    BathCirculator,
    /// Temperature controller.
    TemperatureController,
    /// Digital/analog I/O module.
    IoModule,
}

impl DeviceKind {
    /// All kinds in probing order.
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::TurboPump,
        DeviceKind::DryPump,
        DeviceKind::BathCirculator,
        DeviceKind::TemperatureController,
        DeviceKind::IoModule,
    ];

    /// Device name used in registries and configuration.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TurboPump => "TurboPump",
            Self::DryPump => "DryPump",
            Self::BathCirculator => "BathCirculator",
            Self::TemperatureController => "TemperatureController",
            Self::IoModule => "IoModule",
        }
    }

    /// Looks a kind up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Line settings the device answers at.
    pub fn settings(&self) -> PortSettings {
        match self {
            Self::TurboPump => PortSettings::new(19200, Parity::Even),
            Self::DryPump => PortSettings::new(38400, Parity::Even),
            Self::BathCirculator => PortSettings::new(9600, Parity::Even),
            Self::TemperatureController => PortSettings::new(19200, Parity::None),
            Self::IoModule => PortSettings::new(9600, Parity::None),
        }
    }

    /// Built-in probe for this device.
    pub fn probe(&self) -> DetectResult<Probe> {
        let probe = match self {
            Self::TurboPump => {
                let telegram =
                    UssTelegram::read_parameter(TURBO_PUMP_ADDRESS, TURBO_PUMP_PROBE_PARAMETER, 0)?;
                Probe::new(self.name(), self.settings(), ProbePacket::uss(&telegram))
            }
            Self::DryPump | Self::BathCirculator => {
                Probe::new(self.name(), self.settings(), holding_register_zero()?)
            }
            Self::TemperatureController => {
                Probe::new(self.name(), self.settings(), input_register_zero()?)
            }
            Self::IoModule => Probe::new(self.name(), self.settings(), holding_register_zero()?)
                .with_fallback(input_register_zero()?),
        };
        Ok(probe)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn holding_register_zero() -> DetectResult<ProbePacket> {
    ModbusRequest::read_holding_registers(DEFAULT_SLAVE_ID, 0, 1)
        .map(|request| ProbePacket::modbus(&request))
        .map_err(DetectError::from)
}

fn input_register_zero() -> DetectResult<ProbePacket> {
    ModbusRequest::read_input_registers(DEFAULT_SLAVE_ID, 0, 1)
        .map(|request| ProbePacket::modbus(&request))
        .map_err(DetectError::from)
}

// =============================================================================
// Catalogue
// =============================================================================

/// Ordered list of probes with unique devices and fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalogue {
    probes: Vec<Probe>,
}

impl Catalogue {
    /// Builds a catalogue, rejecting duplicate devices and fingerprints.
    pub fn new(probes: Vec<Probe>) -> DetectResult<Self> {
        for (i, probe) in probes.iter().enumerate() {
            for earlier in &probes[..i] {
                if earlier.device == probe.device {
                    return Err(DetectError::DuplicateDevice(probe.device.clone()));
                }
                if earlier.fingerprint() == probe.fingerprint() {
                    return Err(DetectError::DuplicateFingerprint {
                        first: earlier.device.clone(),
                        second: probe.device.clone(),
                        baud_rate: probe.settings.baud_rate,
                        parity: probe.settings.parity.char(),
                    });
                }
            }
        }
        Ok(Self { probes })
    }

    /// The built-in catalogue of all [`DeviceKind`]s.
    pub fn builtin() -> DetectResult<Self> {
        let probes = DeviceKind::ALL
            .iter()
            .map(DeviceKind::probe)
            .collect::<DetectResult<Vec<_>>>()?;
        Self::new(probes)
    }

    /// Applies `timeout` to every probe without its own timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        for probe in &mut self.probes {
            probe.timeout.get_or_insert(timeout);
        }
        self
    }

    /// Keeps only the probes whose device is not in `skip`.
    pub fn without_devices(mut self, skip: &[String]) -> Self {
        self.probes.retain(|probe| !skip.contains(&probe.device));
        self
    }

    /// Probes in order.
    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Probe for `device`, if any.
    pub fn probe(&self, device: &str) -> Option<&Probe> {
        self.probes.iter().find(|probe| probe.device == device)
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Returns `true` if the catalogue holds no probe.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
