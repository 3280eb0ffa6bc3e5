// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Process-wide registry of port channels.
//!
//! The registry guarantees a single [`PortChannel`] per port name and
//! hands out [`CommunicationAdapter`]s bound to it. All channels forward
//! their connection events to one aggregated stream.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::adapter::CommunicationAdapter;
use crate::channel::{ChannelStatus, PortChannel};
use crate::error::BusResult;
use crate::events::{ConnectionEvent, EVENT_CAPACITY};
use crate::port::{PortProvider, SystemPorts};
use crate::types::{BusTuning, PortSettings};

/// Registry of channels keyed by port name.
pub struct ChannelRegistry {
    provider: Arc<dyn PortProvider>,
    tuning: BusTuning,
    channels: DashMap<String, Arc<PortChannel>>,
    adapters: DashMap<String, Arc<CommunicationAdapter>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ChannelRegistry {
    /// Creates an empty registry using `provider` for all ports.
    pub fn new(provider: Arc<dyn PortProvider>, tuning: BusTuning) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            tuning,
            channels: DashMap::new(),
            adapters: DashMap::new(),
            events,
        }
    }

    /// Creates an empty registry for the host's serial ports.
    pub fn with_system_ports(tuning: BusTuning) -> Self {
        Self::new(Arc::new(SystemPorts::new()), tuning)
    }

    /// Port provider shared by all channels.
    pub fn provider(&self) -> &Arc<dyn PortProvider> {
        &self.provider
    }

    /// Returns the channel for `port`, creating it on first use.
    ///
    /// Settings are fixed when the channel is created; a later request
    /// with different settings gets the existing channel. A channel
    /// disposed by [`close_all`](Self::close_all) is replaced.
    pub fn get_or_create_channel(&self, port: &str, settings: &PortSettings) -> Arc<PortChannel> {
        let mut entry = self
            .channels
            .entry(port.to_string())
            .or_insert_with(|| self.new_channel(port, settings));
        if entry.is_disposed() {
            tracing::debug!(port = %port, "Replacing disposed channel");
            *entry = self.new_channel(port, settings);
        }
        let channel = Arc::clone(entry.value());
        drop(entry);

        if channel.settings() != settings {
            tracing::warn!(
                port = %port,
                existing = %channel.settings(),
                requested = %settings,
                "Channel exists with different settings; keeping existing"
            );
        }

        channel
    }

    /// Creates an adapter for `device` on the shared channel of `port`.
    ///
    /// A second call for the same device replaces the earlier adapter.
    pub fn create_communication_manager(
        &self,
        port: &str,
        settings: &PortSettings,
        device: &str,
        timeout: Duration,
    ) -> Arc<CommunicationAdapter> {
        let channel = self.get_or_create_channel(port, settings);
        let adapter = Arc::new(CommunicationAdapter::new(device, channel, timeout));
        self.adapters.insert(device.to_string(), Arc::clone(&adapter));
        tracing::debug!(device = %device, port = %port, "Created adapter");
        adapter
    }

    /// Returns the channel for `port`, if any.
    pub fn channel(&self, port: &str) -> Option<Arc<PortChannel>> {
        self.channels.get(port).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the adapter for `device`, if any.
    pub fn adapter(&self, device: &str) -> Option<Arc<CommunicationAdapter>> {
        self.adapters.get(device).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns all adapters bound to `port`.
    pub fn adapters_for(&self, port: &str) -> Vec<Arc<CommunicationAdapter>> {
        let mut adapters: Vec<_> = self
            .adapters
            .iter()
            .filter(|entry| entry.value().port() == port)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        adapters.sort_by(|a, b| a.device().cmp(b.device()));
        adapters
    }

    /// Registered port names, sorted.
    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<_> = self.channels.iter().map(|entry| entry.key().clone()).collect();
        ports.sort();
        ports
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if no channel has been created.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Opens every channel. Returns the per-port outcome.
    pub fn open_all(&self) -> Vec<(String, BusResult<bool>)> {
        self.snapshot()
            .into_iter()
            .map(|channel| (channel.port().to_string(), channel.open()))
            .collect()
    }

    /// Closes every channel.
    pub fn close_all(&self) {
        for channel in self.snapshot() {
            channel.close();
        }
    }

    /// Status of every channel, sorted by port.
    pub fn status(&self) -> Vec<ChannelStatus> {
        self.snapshot().iter().map(|channel| channel.status()).collect()
    }

    /// Subscribes to the events of all channels.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn new_channel(&self, port: &str, settings: &PortSettings) -> Arc<PortChannel> {
        tracing::debug!(port = %port, settings = %settings, "Creating channel");
        Arc::new(PortChannel::with_upstream(
            port,
            settings.clone(),
            Arc::clone(&self.provider),
            self.tuning.clone(),
            Some(self.events.clone()),
        ))
    }

    fn snapshot(&self) -> Vec<Arc<PortChannel>> {
        let mut channels: Vec<_> = self.channels.iter().map(|entry| Arc::clone(entry.value())).collect();
        channels.sort_by(|a, b| a.port().cmp(b.port()));
        channels
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("ports", &self.ports())
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
