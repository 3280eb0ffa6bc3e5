// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema.
//!
//! Every section has defaults, so an empty file is a valid configuration:
//!
//! ```yaml
//! bus:
//!   failure_threshold: 3
//!   reconnect_backoff: 3s
//! priority:
//!   query_lock_budget: 50ms
//! detection:
//!   enabled: true
//!   probe_timeout: 500ms
//!   exclude_ports: [COM1]
//! devices:
//!   DryPump:
//!     port: COM5
//!     baud_rate: 38400
//!     parity: even
//!     expected_response_length: 7
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vacbus_core::{
    BusTuning, ChannelRegistry, CommunicationAdapter, DataBits, Parity, PortSettings,
    PriorityConfig, StopBits,
};
use vacbus_detect::DetectorOptions;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// VacbusConfig
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacbusConfig {
    /// Channel worker timing.
    pub bus: BusTuning,

    /// Execute/query scheduling.
    pub priority: PriorityConfig,

    /// Port auto-detection.
    pub detection: DetectionConfig,

    /// Static device bindings, keyed by device name.
    pub devices: BTreeMap<String, DeviceBinding>,
}

impl VacbusConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.bus
            .validate()
            .map_err(|e| ConfigError::validation("bus", e.to_string()))?;
        non_zero("bus.reconnect_backoff", self.bus.reconnect_backoff)?;
        non_zero("bus.join_timeout", self.bus.join_timeout)?;
        non_zero("priority.query_lock_budget", self.priority.query_lock_budget)?;

        self.detection.validate()?;

        let mut ports: HashMap<&str, &str> = HashMap::new();
        for (name, binding) in &self.devices {
            binding.validate(name)?;
            if let Some(first) = ports.insert(binding.port.as_str(), name.as_str()) {
                return Err(ConfigError::duplicate_port(&binding.port, first, name));
            }
        }

        Ok(())
    }

    /// Returns the static binding for `device`.
    pub fn device(&self, device: &str) -> Option<&DeviceBinding> {
        self.devices.get(device)
    }

    /// Ports claimed by static bindings.
    pub fn static_ports(&self) -> Vec<String> {
        self.devices.values().map(|b| b.port.clone()).collect()
    }

    /// Names of statically bound devices.
    pub fn static_devices(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Detection options with the statically bound ports excluded.
    pub fn detector_options(&self) -> DetectorOptions {
        let mut options = self.detection.options.clone();
        for port in self.static_ports() {
            if !options.exclude_ports.contains(&port) {
                options.exclude_ports.push(port);
            }
        }
        options
    }

    /// Creates one channel and one adapter per static binding.
    pub fn seed_registry(
        &self,
        registry: &ChannelRegistry,
    ) -> ConfigResult<Vec<Arc<CommunicationAdapter>>> {
        self.devices
            .iter()
            .map(|(name, binding)| {
                let settings = binding.settings(name)?;
                let adapter =
                    registry.create_communication_manager(&binding.port, &settings, name, binding.timeout);
                adapter.set_expected_response_length(binding.expected_response_length);
                Ok(adapter)
            })
            .collect()
    }
}

fn non_zero(field: &str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::validation(field, "must be non-zero"));
    }
    Ok(())
}

// =============================================================================
// DetectionConfig
// =============================================================================

/// Auto-detection section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Run detection at startup.
    pub enabled: bool,

    /// Detector options.
    #[serde(flatten)]
    pub options: DetectorOptions,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            options: DetectorOptions::default(),
        }
    }
}

impl DetectionConfig {
    fn validate(&self) -> ConfigResult<()> {
        non_zero("detection.probe_timeout", self.options.probe_timeout)
    }
}

// =============================================================================
// DeviceBinding
// =============================================================================

/// A device pinned to a port, bypassing detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    /// Port name, e.g. `COM5` or `/dev/ttyUSB0`.
    pub port: String,

    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Parity.
    #[serde(default)]
    pub parity: Parity,

    /// Data bits.
    #[serde(default)]
    pub data_bits: DataBits,

    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,

    /// Expected response length, `0` if unknown.
    #[serde(default)]
    pub expected_response_length: usize,

    /// Response timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> Duration {
    Duration::from_millis(500)
}

impl DeviceBinding {
    /// Creates a binding with default line settings.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            parity: Parity::default(),
            data_bits: DataBits::default(),
            stop_bits: StopBits::default(),
            expected_response_length: 0,
            timeout: default_timeout(),
        }
    }

    /// Line settings of this binding.
    pub fn settings(&self, device: &str) -> ConfigResult<PortSettings> {
        PortSettings::builder()
            .baud_rate(self.baud_rate)
            .parity(self.parity)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .build()
            .map_err(|e| ConfigError::validation(format!("devices.{device}"), e.to_string()))
    }

    fn validate(&self, device: &str) -> ConfigResult<()> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::validation(
                format!("devices.{device}.port"),
                "cannot be empty",
            ));
        }
        non_zero(&format!("devices.{device}.timeout"), self.timeout)?;
        self.settings(device).map(|_| ())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VacbusConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.detection.enabled);
        assert_eq!(config.bus.failure_threshold, 3);
        assert_eq!(config.priority.query_lock_budget, Duration::from_millis(50));
        assert_eq!(config.detection.options.probe_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut config = VacbusConfig::default();
        config.devices.insert("BathCirculator".into(), DeviceBinding::new("COM5"));
        config.devices.insert("DryPump".into(), DeviceBinding::new("COM5"));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort { ref port, .. }) if port == "COM5"
        ));
    }

    #[test]
    fn test_unsupported_baud_rejected() {
        let mut config = VacbusConfig::default();
        let mut binding = DeviceBinding::new("COM4");
        binding.baud_rate = 12345;
        config.devices.insert("IoModule".into(), binding);

        let err = config.validate().unwrap_err();
        assert_eq!(err.error_type(), "validation");
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = VacbusConfig::default();
        config.priority.query_lock_budget = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = VacbusConfig::default();
        config.bus.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = VacbusConfig::default();
        let mut binding = DeviceBinding::new("COM4");
        binding.timeout = Duration::ZERO;
        config.devices.insert("IoModule".into(), binding);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_options_exclude_static_ports() {
        let mut config = VacbusConfig::default();
        config.detection.options.exclude_ports.push("COM1".into());
        config.devices.insert("DryPump".into(), DeviceBinding::new("COM5"));

        let options = config.detector_options();
        assert_eq!(options.exclude_ports, vec!["COM1".to_string(), "COM5".to_string()]);
        assert_eq!(config.static_devices(), vec!["DryPump".to_string()]);
    }
}
