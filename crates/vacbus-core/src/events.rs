// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection state notifications.
//!
//! Every channel publishes a [`ConnectionEvent`] whenever its connected
//! flag changes. Subscribers use a `tokio::sync::broadcast` receiver, which
//! works from worker threads and async tasks alike. Channels created by a
//! registry additionally forward their events to the registry's
//! aggregated stream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of each broadcast buffer.
pub const EVENT_CAPACITY: usize = 64;

/// Why a channel's connection state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionReason {
    /// The channel opened its port for the first time.
    Opened,
    /// The worker reopened the port after a disconnect.
    Reconnected,
    /// Too many consecutive timeouts or empty responses.
    TransientThreshold,
    /// A critical I/O fault was observed.
    CriticalFault,
    /// The channel was closed.
    Closed,
}

impl fmt::Display for ConnectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Opened => "opened",
            Self::Reconnected => "reconnected",
            Self::TransientThreshold => "transient_threshold",
            Self::CriticalFault => "critical_fault",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A change of a channel's connected flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// Port name.
    pub port: String,
    /// New connected state.
    pub connected: bool,
    /// Cause of the change.
    pub reason: ConnectionReason,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

impl ConnectionEvent {
    /// Creates an event stamped with the current time.
    pub fn new(port: impl Into<String>, connected: bool, reason: ConnectionReason) -> Self {
        Self {
            port: port.into(),
            connected,
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Per-channel event publisher with an optional upstream forward.
#[derive(Debug)]
pub(crate) struct EventHub {
    local: broadcast::Sender<ConnectionEvent>,
    upstream: Option<broadcast::Sender<ConnectionEvent>>,
}

impl EventHub {
    pub(crate) fn new(upstream: Option<broadcast::Sender<ConnectionEvent>>) -> Self {
        let (local, _) = broadcast::channel(EVENT_CAPACITY);
        Self { local, upstream }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.local.subscribe()
    }

    /// Sends `event` to all subscribers. Having none is not an error.
    pub(crate) fn publish(&self, event: ConnectionEvent) {
        tracing::debug!(
            port = %event.port,
            connected = event.connected,
            reason = %event.reason,
            "Connection state changed"
        );

        if let Some(upstream) = &self.upstream {
            let _ = upstream.send(event.clone());
        }
        let _ = self.local.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_local_and_upstream() {
        let (upstream, mut aggregated) = broadcast::channel(8);
        let hub = EventHub::new(Some(upstream));
        let mut local = hub.subscribe();

        hub.publish(ConnectionEvent::new("COM3", true, ConnectionReason::Opened));

        let a = local.try_recv().unwrap();
        let b = aggregated.try_recv().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.reason, ConnectionReason::Opened);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new(None);
        hub.publish(ConnectionEvent::new("COM3", false, ConnectionReason::Closed));
    }

    #[test]
    fn test_event_serde() {
        let event = ConnectionEvent::new("COM4", false, ConnectionReason::CriticalFault);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"critical_fault\""));
    }
}
