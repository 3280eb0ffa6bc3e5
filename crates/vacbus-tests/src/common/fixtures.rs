// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Device responders, bus timing and prebuilt benches.

use std::sync::Arc;
use std::time::Duration;

use vacbus_core::{BusTuning, Parity, PortSettings};
use vacbus_detect::DeviceKind;
use vacbus_protocol::{modbus, uss};

use super::mocks::{Responder, SimulatedPorts};

// =============================================================================
// Timing
// =============================================================================

/// Bus timing scaled down for tests.
pub struct TuningFixtures;

impl TuningFixtures {
    /// Short settle times, 50 ms reconnect backoff.
    pub fn fast() -> BusTuning {
        BusTuning {
            min_wait_floor: Duration::from_millis(1),
            device_margin: Duration::from_millis(1),
            quiescence: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            dequeue_poll: Duration::from_millis(5),
            failure_threshold: 3,
            reconnect_backoff: Duration::from_millis(50),
            caller_margin: Duration::from_millis(200),
            join_timeout: Duration::from_millis(500),
        }
    }

    /// Like [`fast`](Self::fast) with a custom failure threshold.
    pub fn with_threshold(failure_threshold: u32) -> BusTuning {
        BusTuning {
            failure_threshold,
            ..Self::fast()
        }
    }
}

/// Command timeout used by most tests.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for waiting on events and handles.
pub const EVENT_WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Responders
// =============================================================================

/// Ready-made device behaviors.
pub struct Responders;

impl Responders {
    /// Answers with the request bytes.
    pub fn echo() -> Responder {
        Arc::new(|request: &[u8]| Some(request.to_vec()))
    }

    /// Never answers.
    pub fn silent() -> Responder {
        Arc::new(|_: &[u8]| None)
    }

    /// Answers only requests whose first byte is `marker`, with an echo.
    pub fn selective(marker: u8) -> Responder {
        Arc::new(move |request: &[u8]| {
            (request.first() == Some(&marker)).then(|| request.to_vec())
        })
    }

    /// Modbus RTU slave.
    ///
    /// FC 03/04 return `address + i` for register `i`, FC 16 echoes the
    /// request header, other codes get an illegal function exception.
    /// Frames with a bad CRC or another slave id are ignored.
    pub fn modbus(slave_id: u8) -> Responder {
        Self::modbus_with_functions(slave_id, &[0x03, 0x04, 0x10])
    }

    /// Modbus slave that ignores everything but `functions`.
    pub fn modbus_with_functions(slave_id: u8, functions: &[u8]) -> Responder {
        let functions = functions.to_vec();
        Arc::new(move |request: &[u8]| {
            if request.len() < 8 || !modbus::validate(request) || request[0] != slave_id {
                return None;
            }
            let function = request[1];
            if !functions.contains(&function) {
                return None;
            }

            let address = u16::from_be_bytes([request[2], request[3]]);
            let quantity = u16::from_be_bytes([request[4], request[5]]);
            let mut frame = match function {
                0x03 | 0x04 => {
                    let mut frame = vec![slave_id, function, (quantity * 2) as u8];
                    for i in 0..quantity {
                        frame.extend_from_slice(&address.wrapping_add(i).to_be_bytes());
                    }
                    frame
                }
                0x10 => request[..6].to_vec(),
                other => vec![slave_id, other | modbus::EXCEPTION_FLAG, 0x01],
            };
            modbus::append_crc(&mut frame);
            Some(frame)
        })
    }

    /// Modbus slave answering every request with exception `code`.
    pub fn modbus_exception(slave_id: u8, code: u8) -> Responder {
        Arc::new(move |request: &[u8]| {
            if request.len() < 4 || !modbus::validate(request) || request[0] != slave_id {
                return None;
            }
            let mut frame = vec![slave_id, request[1] | modbus::EXCEPTION_FLAG, code];
            modbus::append_crc(&mut frame);
            Some(frame)
        })
    }

    /// USS drive answering parameter reads with `value` and status word
    /// `0x0B31`.
    pub fn uss_drive(address: u8, value: u32) -> Responder {
        Arc::new(move |request: &[u8]| {
            let telegram = uss::UssTelegram::decode(request).ok()?;
            if telegram.address != address {
                return None;
            }
            let mut reply = uss::UssTelegram::new(address);
            reply.pke = (1 << 12) | telegram.parameter_number();
            reply.index = telegram.index;
            reply.pwe = value;
            reply.pzd[0] = 0x0B31;
            Some(reply.encode().to_vec())
        })
    }

    /// Answers with `bytes` regardless of the request.
    pub fn fixed(bytes: Vec<u8>) -> Responder {
        Arc::new(move |_: &[u8]| Some(bytes.clone()))
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Catalogued devices attached to a fabric.
pub struct DeviceFixtures;

impl DeviceFixtures {
    /// Responder that passes the built-in probe of `kind`.
    pub fn responder(kind: DeviceKind) -> Responder {
        match kind {
            DeviceKind::TurboPump => Responders::uss_drive(0, 1500),
            DeviceKind::DryPump | DeviceKind::BathCirculator => Responders::modbus(1),
            DeviceKind::TemperatureController => Responders::modbus_with_functions(1, &[0x04]),
            DeviceKind::IoModule => Responders::modbus_with_functions(1, &[0x04]),
        }
    }

    /// Attaches `kind` to `port` at its catalogued settings.
    pub fn attach(fabric: &SimulatedPorts, port: &str, kind: DeviceKind) {
        fabric.attach(port, &kind.settings(), Self::responder(kind));
    }

    /// Settings matching no catalogued device.
    pub fn odd_settings() -> PortSettings {
        PortSettings::new(57600, Parity::Odd)
    }
}

// =============================================================================
// Benches
// =============================================================================

/// Prebuilt fabrics.
pub struct BenchFixtures;

impl BenchFixtures {
    /// Dry pump on `COM5`, nothing answering on `COM3`.
    pub fn dry_pump_bench() -> SimulatedPorts {
        let fabric = SimulatedPorts::new();
        fabric.add_port("COM3");
        DeviceFixtures::attach(&fabric, "COM5", DeviceKind::DryPump);
        fabric
    }

    /// Every catalogued device on its own port, `COM1` through `COM5` in
    /// catalogue order, plus an empty `COM6`.
    pub fn full_bench() -> SimulatedPorts {
        let fabric = SimulatedPorts::new();
        for (i, kind) in DeviceKind::ALL.into_iter().enumerate() {
            DeviceFixtures::attach(&fabric, &format!("COM{}", i + 1), kind);
        }
        fabric.add_port("COM6");
        fabric
    }
}
