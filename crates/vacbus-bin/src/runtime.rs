// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bus runtime orchestration.
//!
//! Assembles a [`ChannelRegistry`] from the static bindings of the
//! configuration and, when enabled, from an auto-detection run, then
//! opens every channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use vacbus_config::VacbusConfig;
use vacbus_core::{
    ChannelRegistry, ChannelStatus, CommunicationAdapter, ConnectionEvent, PortProvider,
};
use vacbus_detect::{Catalogue, DetectionResult, PortDetector};

use crate::error::BinResult;

// =============================================================================
// StatusReport
// =============================================================================

/// Snapshot printed by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Device to port map.
    pub devices: BTreeMap<String, String>,
    /// Catalogued devices that no port answered for.
    pub undetected: Vec<String>,
    /// Per-channel state.
    pub channels: Vec<ChannelStatus>,
}

// =============================================================================
// BusRuntime
// =============================================================================

/// A registry with every known device attached.
pub struct BusRuntime {
    registry: ChannelRegistry,
    adapters: Vec<Arc<CommunicationAdapter>>,
    detection: Option<DetectionResult>,
}

impl BusRuntime {
    /// Builds the registry and opens all channels.
    ///
    /// Statically bound devices are left out of the probe catalogue and
    /// their ports are never probed.
    pub async fn start(
        config: &VacbusConfig,
        provider: Arc<dyn PortProvider>,
        detect: bool,
    ) -> BinResult<Self> {
        let registry = ChannelRegistry::new(Arc::clone(&provider), config.bus.clone());
        let mut adapters = config.seed_registry(&registry)?;

        let detection = if detect && config.detection.enabled {
            let catalogue = Catalogue::builtin()?.without_devices(&config.static_devices());
            let detector = Arc::new(PortDetector::new(
                provider,
                catalogue,
                config.detector_options(),
                config.bus.clone(),
            ));
            let result = detector.detect_async().await?;
            adapters.extend(result.seed_registry(&registry));
            Some(result)
        } else {
            None
        };

        for (port, outcome) in registry.open_all() {
            match outcome {
                Ok(true) => info!(port = %port, "Channel opened"),
                Ok(false) => {}
                Err(e) => warn!(port = %port, error = %e, "Channel failed to open"),
            }
        }

        info!(
            channels = registry.len(),
            devices = adapters.len(),
            "Bus runtime started"
        );

        Ok(Self {
            registry,
            adapters,
            detection,
        })
    }

    /// The registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Adapters of all attached devices.
    pub fn adapters(&self) -> &[Arc<CommunicationAdapter>] {
        &self.adapters
    }

    /// Detection result, if detection ran.
    pub fn detection(&self) -> Option<&DetectionResult> {
        self.detection.as_ref()
    }

    /// Subscribes to connection events of every channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.subscribe()
    }

    /// Current state of all devices and channels.
    pub fn report(&self) -> StatusReport {
        StatusReport {
            devices: self
                .adapters
                .iter()
                .map(|a| (a.device().to_string(), a.port().to_string()))
                .collect(),
            undetected: self
                .detection
                .as_ref()
                .map(|d| d.undetected.clone())
                .unwrap_or_default(),
            channels: self.registry.status(),
        }
    }

    /// Closes every channel.
    pub fn shutdown(&self) {
        info!("Closing all channels");
        self.registry.close_all();
    }
}

// =============================================================================
// Tests
// =============================================================================
