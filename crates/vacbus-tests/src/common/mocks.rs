// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Simulated Serial Fabric
//!
//! [`SimulatedPorts`] implements [`PortProvider`] on top of an in-memory
//! set of ports. Each port may host one simulated device that answers
//! only when the port is opened at the device's `(baud, parity)` pair,
//! the way a real instrument ignores a line at the wrong framing.
//!
//! ## Capabilities
//!
//! - Unplug/replug: an unplugged port disappears from enumeration, cannot
//!   be opened, and every open handle fails with `BrokenPipe`
//! - Fault injection on write (`TimedOut` is transient, most other kinds
//!   are critical)
//! - Per-port response latency
//! - Interaction recording: opens, writes, and the peak number of
//!   transactions in flight on one port

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vacbus_core::{Parity, PortProvider, PortSettings, SerialIo};

/// Computes a device's answer to one request. `None` means silence.
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

// =============================================================================
// Port State
// =============================================================================

struct SimDevice {
    baud_rate: u32,
    parity: Parity,
    responder: Responder,
}

impl SimDevice {
    fn accepts(&self, settings: &PortSettings) -> bool {
        self.baud_rate == settings.baud_rate && self.parity == settings.parity
    }
}

#[derive(Default)]
struct PortState {
    present: bool,
    generation: u64,
    device: Option<SimDevice>,
    faults: VecDeque<io::ErrorKind>,
    latency: Duration,
    handles: usize,
    in_flight: usize,
    stats: PortStats,
    writes: Vec<Vec<u8>>,
}

impl PortState {
    fn present() -> Self {
        Self {
            present: true,
            ..Default::default()
        }
    }
}

/// Interaction counters of one simulated port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Successful opens.
    pub opens: u64,
    /// Opens refused (unplugged, busy, unknown).
    pub failed_opens: u64,
    /// Requests written.
    pub writes: u64,
    /// Requests the device answered.
    pub answered: u64,
    /// Highest number of transactions in flight at once.
    pub max_in_flight: usize,
}

type Ports = Arc<Mutex<BTreeMap<String, PortState>>>;

// =============================================================================
// SimulatedPorts
// =============================================================================

/// In-memory serial fabric.
#[derive(Default)]
pub struct SimulatedPorts {
    ports: Ports,
    enumeration_fails: AtomicBool,
}

impl SimulatedPorts {
    /// Creates an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty port. Existing ports are left untouched.
    pub fn add_port(&self, port: &str) -> &Self {
        self.ports
            .lock()
            .entry(port.to_string())
            .or_insert_with(PortState::present);
        self
    }

    /// Connects a device to `port`, adding the port if needed.
    pub fn attach(&self, port: &str, settings: &PortSettings, responder: Responder) -> &Self {
        let mut ports = self.ports.lock();
        let state = ports
            .entry(port.to_string())
            .or_insert_with(PortState::present);
        state.device = Some(SimDevice {
            baud_rate: settings.baud_rate,
            parity: settings.parity,
            responder,
        });
        self
    }

    /// Removes `port` from the system. Open handles start failing.
    pub fn unplug(&self, port: &str) {
        if let Some(state) = self.ports.lock().get_mut(port) {
            state.present = false;
            state.generation += 1;
        }
    }

    /// Brings an unplugged port back.
    pub fn replug(&self, port: &str) {
        if let Some(state) = self.ports.lock().get_mut(port) {
            state.present = true;
        }
    }

    /// Makes the next `count` writes on `port` fail with `kind`.
    pub fn inject_faults(&self, port: &str, kind: io::ErrorKind, count: usize) {
        if let Some(state) = self.ports.lock().get_mut(port) {
            state.faults.extend(std::iter::repeat(kind).take(count));
        }
    }

    /// Delays every answer on `port` by `latency`.
    pub fn set_latency(&self, port: &str, latency: Duration) {
        if let Some(state) = self.ports.lock().get_mut(port) {
            state.latency = latency;
        }
    }

    /// Makes `available_ports` fail while `fail` is set.
    pub fn fail_enumeration(&self, fail: bool) {
        self.enumeration_fails.store(fail, Ordering::Release);
    }

    /// Counters of `port`.
    pub fn stats(&self, port: &str) -> PortStats {
        self.ports
            .lock()
            .get(port)
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    /// Requests written to `port`, oldest first.
    pub fn writes(&self, port: &str) -> Vec<Vec<u8>> {
        self.ports
            .lock()
            .get(port)
            .map(|state| state.writes.clone())
            .unwrap_or_default()
    }

    /// Handles currently open on `port`.
    pub fn open_handles(&self, port: &str) -> usize {
        self.ports.lock().get(port).map_or(0, |state| state.handles)
    }
}

impl PortProvider for SimulatedPorts {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        if self.enumeration_fails.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "enumeration unavailable"));
        }
        Ok(self
            .ports
            .lock()
            .iter()
            .filter(|(_, state)| state.present)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn open(&self, port: &str, settings: &PortSettings) -> io::Result<Box<dyn SerialIo>> {
        let mut ports = self.ports.lock();
        let Some(state) = ports.get_mut(port) else {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{port} does not exist")));
        };
        if !state.present {
            state.stats.failed_opens += 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{port} is unplugged")));
        }
        if state.handles > 0 {
            state.stats.failed_opens += 1;
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, format!("{port} is busy")));
        }

        state.handles += 1;
        state.stats.opens += 1;

        Ok(Box::new(SimPort {
            name: port.to_string(),
            settings: settings.clone(),
            generation: state.generation,
            ports: Arc::clone(&self.ports),
            rx: VecDeque::new(),
            ready_at: Instant::now(),
            in_flight: false,
        }))
    }
}

impl fmt::Debug for SimulatedPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = self.ports.lock();
        f.debug_struct("SimulatedPorts")
            .field("ports", &ports.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// SimPort
// =============================================================================

/// Handle returned by [`SimulatedPorts::open`].
struct SimPort {
    name: String,
    settings: PortSettings,
    generation: u64,
    ports: Ports,
    rx: VecDeque<u8>,
    ready_at: Instant,
    in_flight: bool,
}

impl SimPort {
    fn unplugged(&self) -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, format!("{} was unplugged", self.name))
    }

    fn check(&self, state: Option<&PortState>) -> io::Result<()> {
        match state {
            Some(state) if state.present && state.generation == self.generation => Ok(()),
            _ => Err(self.unplugged()),
        }
    }

    fn end_transaction(&mut self) {
        if !self.in_flight {
            return;
        }
        self.in_flight = false;
        if let Some(state) = self.ports.lock().get_mut(&self.name) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }
}

impl SerialIo for SimPort {
    fn clear_input(&mut self) -> io::Result<()> {
        self.check(self.ports.lock().get(&self.name))?;
        self.rx.clear();
        self.end_transaction();
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let (responder, latency) = {
            let mut ports = self.ports.lock();
            let state = ports.get_mut(&self.name);
            self.check(state.as_deref())?;
            let Some(state) = state else {
                return Err(self.unplugged());
            };

            if let Some(kind) = state.faults.pop_front() {
                return Err(io::Error::new(kind, "injected fault"));
            }

            state.stats.writes += 1;
            state.writes.push(data.to_vec());
            state.in_flight += 1;
            state.stats.max_in_flight = state.stats.max_in_flight.max(state.in_flight);

            let responder = state
                .device
                .as_ref()
                .filter(|device| device.accepts(&self.settings))
                .map(|device| Arc::clone(&device.responder));
            (responder, state.latency)
        };
        self.in_flight = true;

        self.rx.clear();
        if let Some(answer) = responder.and_then(|respond| respond(data)) {
            if let Some(state) = self.ports.lock().get_mut(&self.name) {
                state.stats.answered += 1;
            }
            self.rx.extend(answer);
        }
        self.ready_at = Instant::now() + latency;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check(self.ports.lock().get(&self.name))
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.check(self.ports.lock().get(&self.name))?;
        if Instant::now() < self.ready_at {
            return Ok(0);
        }
        Ok(self.rx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check(self.ports.lock().get(&self.name))?;
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        if self.rx.is_empty() {
            self.end_transaction();
        }
        Ok(n)
    }
}

impl Drop for SimPort {
    fn drop(&mut self) {
        self.end_transaction();
        if let Some(state) = self.ports.lock().get_mut(&self.name) {
            state.handles = state.handles.saturating_sub(1);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
