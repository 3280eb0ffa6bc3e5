// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One-shot port auto-detection.
//!
//! For each probe in catalogue order, every still unassigned port is
//! opened transiently at the probe's settings and sent the probe packet.
//! The first port that answers validly is claimed for the device and
//! removed from the pool, so one port maps to at most one detected
//! device. Ports are always closed again before the next attempt; the
//! [`ChannelRegistry`] opens the persistent channels from the result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use vacbus_core::transaction::{self, Exchange};
use vacbus_core::{BusTuning, ChannelRegistry, CommunicationAdapter, PortProvider, PortSettings};

use crate::catalog::Catalogue;
use crate::error::{DetectError, DetectResult};
use crate::probe::{PacketVariant, Probe, ProbePacket, Protocol};

// =============================================================================
// DetectorOptions
// =============================================================================

/// Detection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    /// Response timeout for probes without their own timeout.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Port names that are never probed.
    pub exclude_ports: Vec<String>,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            exclude_ports: Vec::new(),
        }
    }
}

// =============================================================================
// DetectionResult
// =============================================================================

/// Where a device was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Port name.
    pub port: String,
    /// Line settings the device answered at.
    pub settings: PortSettings,
    /// Protocol of the device.
    pub protocol: Protocol,
    /// Packet that identified the device.
    pub variant: PacketVariant,
    /// Response length of the identifying packet; 0 when unknown.
    pub expected_response_length: usize,
    /// Response timeout the device was probed with.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Outcome of a detection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Detected devices by name.
    pub assignments: BTreeMap<String, Assignment>,
    /// Devices no port answered for, in probing order.
    pub undetected: Vec<String>,
    /// Ports that were probed.
    pub scanned_ports: Vec<String>,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl DetectionResult {
    /// Port of `device`, if detected.
    pub fn port_for(&self, device: &str) -> Option<&str> {
        self.assignments.get(device).map(|a| a.port.as_str())
    }

    /// Device detected on `port`, if any.
    pub fn device_on(&self, port: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(_, a)| a.port == port)
            .map(|(device, _)| device.as_str())
    }

    /// Port to device map.
    pub fn port_to_device(&self) -> BTreeMap<String, String> {
        self.assignments
            .iter()
            .map(|(device, a)| (a.port.clone(), device.clone()))
            .collect()
    }

    /// Returns `true` if every probed device was found.
    pub fn is_complete(&self) -> bool {
        self.undetected.is_empty()
    }

    /// Creates one channel and one adapter per detected device.
    ///
    /// Each adapter starts with the assignment's timeout and expected
    /// response length.
    pub fn seed_registry(&self, registry: &ChannelRegistry) -> Vec<Arc<CommunicationAdapter>> {
        self.assignments
            .iter()
            .map(|(device, a)| {
                let adapter =
                    registry.create_communication_manager(&a.port, &a.settings, device, a.timeout);
                adapter.set_expected_response_length(a.expected_response_length);
                adapter
            })
            .collect()
    }
}

// =============================================================================
// PortDetector
// =============================================================================

/// Runs a [`Catalogue`] against the system's ports.
pub struct PortDetector {
    provider: Arc<dyn PortProvider>,
    catalogue: Catalogue,
    options: DetectorOptions,
    tuning: BusTuning,
}

impl PortDetector {
    /// Creates a detector.
    pub fn new(
        provider: Arc<dyn PortProvider>,
        catalogue: Catalogue,
        options: DetectorOptions,
        tuning: BusTuning,
    ) -> Self {
        Self {
            provider,
            catalogue,
            options,
            tuning,
        }
    }

    /// Catalogue in use.
    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Runs detection. Blocks for up to a few seconds per port.
    ///
    /// # Errors
    ///
    /// Only fails when the port list cannot be read. Devices that do not
    /// answer are listed in [`DetectionResult::undetected`].
    pub fn detect(&self) -> DetectResult<DetectionResult> {
        let started = Instant::now();
        let mut pool: Vec<String> = self
            .provider
            .available_ports()
            .map_err(DetectError::Enumeration)?
            .into_iter()
            .filter(|port| !self.options.exclude_ports.contains(port))
            .collect();

        tracing::info!(
            ports = ?pool,
            probes = self.catalogue.len(),
            "Starting port detection"
        );

        let mut result = DetectionResult {
            scanned_ports: pool.clone(),
            ..Default::default()
        };

        for probe in self.catalogue.probes() {
            let found = pool
                .iter()
                .enumerate()
                .find_map(|(i, port)| self.probe_port(port, probe).map(|variant| (i, variant)));

            match found {
                Some((i, variant)) => {
                    let port = pool.remove(i);
                    tracing::info!(device = %probe.device, port = %port, "Device detected");
                    result.assignments.insert(
                        probe.device.clone(),
                        Assignment {
                            port,
                            settings: probe.settings.clone(),
                            protocol: probe.protocol(),
                            variant,
                            expected_response_length: probe
                                .packet(variant)
                                .map_or(0, |packet| packet.expected_len),
                            timeout: self.probe_timeout(probe),
                        },
                    );
                }
                None => {
                    tracing::info!(device = %probe.device, "Device not detected");
                    result.undetected.push(probe.device.clone());
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            detected = result.assignments.len(),
            undetected = result.undetected.len(),
            elapsed_ms = result.elapsed_ms,
            "Port detection finished"
        );

        Ok(result)
    }

    /// Runs [`detect`](Self::detect) on Tokio's blocking pool.
    pub async fn detect_async(self: Arc<Self>) -> DetectResult<DetectionResult> {
        tokio::task::spawn_blocking(move || self.detect())
            .await
            .map_err(|e| DetectError::Task(e.to_string()))?
    }

    /// Probes a single port. Returns the packet that got a valid answer.
    pub fn probe_port(&self, port: &str, probe: &Probe) -> Option<PacketVariant> {
        let mut handle = match self.provider.open(port, &probe.settings) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(port = %port, device = %probe.device, error = %e, "Cannot open port for probing");
                return None;
            }
        };

        let timeout = self.probe_timeout(probe);
        for (variant, packet) in probe.packets() {
            if self.send_packet(&mut *handle, port, probe, packet, timeout) {
                return Some(variant);
            }
        }
        None
    }

    fn probe_timeout(&self, probe: &Probe) -> Duration {
        probe.timeout.unwrap_or(self.options.probe_timeout)
    }

    fn send_packet(
        &self,
        handle: &mut dyn vacbus_core::SerialIo,
        port: &str,
        probe: &Probe,
        packet: &ProbePacket,
        timeout: Duration,
    ) -> bool {
        let exchange = Exchange {
            request: &packet.request,
            expected_len: packet.expected_len,
            timeout,
        };

        match transaction::transact(handle, exchange, &probe.settings, &self.tuning) {
            Ok(response) => {
                let valid = packet.validator.matches(&response);
                tracing::debug!(
                    port = %port,
                    device = %probe.device,
                    received = response.len(),
                    valid,
                    "Probe answered"
                );
                valid
            }
            Err(e) => {
                tracing::debug!(port = %port, device = %probe.device, error = %e, "Probe failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for PortDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortDetector")
            .field("probes", &self.catalogue.len())
            .field("options", &self.options)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceKind;
    use std::io;
    use vacbus_core::{Parity, SerialIo};

    /// One dry pump on COM5; COM3 is silent.
    struct Bench;

    struct DryPumpPort {
        answer: Vec<u8>,
    }

    impl SerialIo for DryPumpPort {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if data == [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A] {
                self.answer = vec![0x01, 0x03, 0x02, 0x00, 0x00, 0xB8, 0x44];
            }
            Ok(())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(self.answer.len())
        }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.answer.len());
            buf[..n].copy_from_slice(&self.answer[..n]);
            self.answer.drain(..n);
            Ok(n)
        }
    }

    struct Silent;

    impl SerialIo for Silent {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(0)
        }
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl PortProvider for Bench {
        fn available_ports(&self) -> io::Result<Vec<String>> {
            Ok(vec!["COM3".into(), "COM5".into()])
        }
        fn open(&self, port: &str, settings: &PortSettings) -> io::Result<Box<dyn SerialIo>> {
            if port == "COM5" && settings.baud_rate == 38400 && settings.parity == Parity::Even {
                Ok(Box::new(DryPumpPort { answer: Vec::new() }))
            } else {
                Ok(Box::new(Silent))
            }
        }
    }

    fn detector(exclude: Vec<String>) -> PortDetector {
        let catalogue = Catalogue::new(vec![
            DeviceKind::DryPump.probe().unwrap(),
            DeviceKind::BathCirculator.probe().unwrap(),
        ])
        .unwrap();
        let options = DetectorOptions {
            probe_timeout: Duration::from_millis(30),
            exclude_ports: exclude,
        };
        PortDetector::new(Arc::new(Bench), catalogue, options, BusTuning::default())
    }

    #[test]
    fn test_detects_dry_pump() {
        let result = detector(Vec::new()).detect().unwrap();

        assert_eq!(result.port_for("DryPump"), Some("COM5"));
        assert_eq!(result.device_on("COM5"), Some("DryPump"));
        assert_eq!(result.device_on("COM3"), None);
        assert_eq!(result.undetected, vec!["BathCirculator".to_string()]);
        assert_eq!(result.assignments["DryPump"].variant, PacketVariant::Primary);
        assert!(!result.is_complete());
    }

    #[test]
    fn test_assignment_carries_response_length_and_timeout() {
        let result = detector(Vec::new()).detect().unwrap();
        let pump = &result.assignments["DryPump"];

        // Read of one holding register: address, function, count, value, CRC.
        assert_eq!(pump.expected_response_length, 7);
        assert_eq!(pump.timeout, Duration::from_millis(30));
    }

    #[test]
    fn test_excluded_port_not_probed() {
        let result = detector(vec!["COM5".into()]).detect().unwrap();
        assert!(result.assignments.is_empty());
        assert_eq!(result.scanned_ports, vec!["COM3".to_string()]);
    }

    #[test]
    fn test_result_serializes() {
        let result = detector(Vec::new()).detect().unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"DryPump\""));
        assert!(json.contains("\"modbus_rtu\""));
    }
}
