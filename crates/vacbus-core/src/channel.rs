// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-port command channel.
//!
//! A [`PortChannel`] owns one physical serial port. Commands from any
//! number of callers are queued and executed strictly one at a time by a
//! dedicated OS thread, which is the only code that ever touches the port
//! handle.
//!
//! # Failure handling
//!
//! | Observation                       | Effect                                   |
//! |-----------------------------------|------------------------------------------|
//! | Non-empty response                | failure counter reset                    |
//! | Empty response / timeout          | counter + 1, disconnect at threshold     |
//! | Critical I/O fault                | immediate disconnect                     |
//!
//! On disconnect the handle is released and every queued command resolves
//! without a response. While disconnected, the worker reopens the port
//! only when the OS lists it again, and waits a fixed backoff between
//! attempts.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::command::{Command, CommandHandle, Completion};
use crate::error::{BusError, BusResult, FaultKind};
use crate::events::{ConnectionEvent, ConnectionReason, EventHub};
use crate::port::{PortProvider, SerialIo};
use crate::transaction::{self, Exchange};
use crate::types::{BusTuning, PortSettings};

// =============================================================================
// ChannelStatus
// =============================================================================

/// Point-in-time view of a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// Port name.
    pub port: String,
    /// Line settings.
    pub settings: PortSettings,
    /// `open` has been called successfully.
    pub opened: bool,
    /// The port handle is currently open.
    pub connected: bool,
    /// The channel has been closed.
    pub disposed: bool,
    /// Commands waiting in the queue.
    pub pending: usize,
    /// Commands executed on the wire.
    pub processed: u64,
    /// Current consecutive transient failures.
    pub consecutive_failures: u32,
    /// Successful reconnects since open.
    pub reconnects: u64,
    /// Time of the last non-empty response.
    pub last_success: Option<DateTime<Utc>>,
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    port: String,
    settings: PortSettings,
    tuning: BusTuning,
    provider: Arc<dyn PortProvider>,
    opened: AtomicBool,
    connected: AtomicBool,
    disposed: AtomicBool,
    consecutive_failures: AtomicU32,
    processed: AtomicU64,
    reconnects: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    events: EventHub,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn event(&self, connected: bool, reason: ConnectionReason) {
        self.events
            .publish(ConnectionEvent::new(self.port.clone(), connected, reason));
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    finished: Receiver<()>,
}

// =============================================================================
// PortChannel
// =============================================================================

/// Serialized command execution on one serial port.
pub struct PortChannel {
    shared: Arc<Shared>,
    sender: Sender<Command>,
    receiver: Receiver<Command>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl PortChannel {
    /// Creates a closed channel. Call [`open`](Self::open) to start it.
    pub fn new(
        port: impl Into<String>,
        settings: PortSettings,
        provider: Arc<dyn PortProvider>,
        tuning: BusTuning,
    ) -> Self {
        Self::with_upstream(port, settings, provider, tuning, None)
    }

    pub(crate) fn with_upstream(
        port: impl Into<String>,
        settings: PortSettings,
        provider: Arc<dyn PortProvider>,
        tuning: BusTuning,
        upstream: Option<broadcast::Sender<ConnectionEvent>>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                port: port.into(),
                settings,
                tuning,
                provider,
                opened: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                processed: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                last_success: Mutex::new(None),
                events: EventHub::new(upstream),
            }),
            sender,
            receiver,
            worker: Mutex::new(None),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Port name.
    pub fn port(&self) -> &str {
        &self.shared.port
    }

    /// Line settings.
    pub fn settings(&self) -> &PortSettings {
        &self.shared.settings
    }

    /// Timing constants.
    pub fn tuning(&self) -> &BusTuning {
        &self.shared.tuning
    }

    /// Returns `true` while the port handle is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Returns `true` once opened and until closed.
    pub fn is_open(&self) -> bool {
        self.shared.opened.load(Ordering::Acquire) && !self.shared.is_disposed()
    }

    /// Returns `true` after [`close`](Self::close).
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Number of queued commands.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Subscribes to this channel's connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns a status snapshot.
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            port: self.shared.port.clone(),
            settings: self.shared.settings.clone(),
            opened: self.shared.opened.load(Ordering::Acquire),
            connected: self.is_connected(),
            disposed: self.is_disposed(),
            pending: self.pending_count(),
            processed: self.shared.processed.load(Ordering::Relaxed),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            last_success: *self.shared.last_success.lock(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the port and starts the worker thread.
    ///
    /// Idempotent: later calls only report the connected state. A failed
    /// initial open still starts the worker, which keeps trying to
    /// reconnect in the background.
    ///
    /// Returns whether the port is connected.
    pub fn open(&self) -> BusResult<bool> {
        if self.is_disposed() {
            return Err(BusError::disposed(self.port()));
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(self.is_connected());
        }

        let shared = &self.shared;
        let handle = match shared.provider.open(&shared.port, &shared.settings) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(
                    port = %shared.port,
                    settings = %shared.settings,
                    error = %e,
                    "Failed to open port; worker will retry"
                );
                None
            }
        };
        let connected = handle.is_some();
        shared.consecutive_failures.store(0, Ordering::Relaxed);
        shared.connected.store(connected, Ordering::Release);

        let (done_tx, finished) = crossbeam_channel::bounded(1);
        let task = Worker {
            shared: Arc::clone(shared),
            queue: self.receiver.clone(),
            port: handle,
            _done: done_tx,
        };

        let thread = thread::Builder::new()
            .name(format!("vacbus-{}", shared.port))
            .spawn(move || task.run())
            .map_err(|source| {
                shared.connected.store(false, Ordering::Release);
                BusError::Spawn {
                    port: shared.port.clone(),
                    source,
                }
            })?;

        *worker = Some(WorkerHandle { thread, finished });
        shared.opened.store(true, Ordering::Release);

        if connected {
            tracing::info!(port = %shared.port, settings = %shared.settings, "Channel opened");
            shared.event(true, ConnectionReason::Opened);
        }

        Ok(connected)
    }

    /// Stops the worker and fails every queued command.
    ///
    /// Idempotent. Waits at most the configured join timeout for the
    /// worker to finish; a worker stuck in a blocking driver call is
    /// detached.
    pub fn close(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let was_connected = self.shared.connected.swap(false, Ordering::AcqRel);

        if let Some(worker) = self.worker.lock().take() {
            let join_timeout = self.shared.tuning.join_timeout;
            match worker.finished.recv_timeout(join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.thread.join().is_err() {
                        tracing::error!(port = %self.shared.port, "Channel worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        port = %self.shared.port,
                        timeout_ms = join_timeout.as_millis() as u64,
                        "Channel worker did not stop in time; detaching"
                    );
                }
            }
        }

        let cancelled = self.cancel_queued();

        if was_connected {
            self.shared.event(false, ConnectionReason::Closed);
        }

        tracing::info!(port = %self.shared.port, cancelled, "Channel closed");
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queues a command.
    ///
    /// A command submitted while the port is disconnected resolves
    /// immediately without a response.
    ///
    /// # Errors
    ///
    /// - [`BusError::Disposed`] after [`close`](Self::close)
    /// - [`BusError::NotOpened`] before [`open`](Self::open)
    pub fn submit(&self, command: Command) -> BusResult<()> {
        if self.is_disposed() {
            return Err(BusError::disposed(self.port()));
        }
        if !self.shared.opened.load(Ordering::Acquire) {
            return Err(BusError::not_opened(self.port()));
        }
        if !self.is_connected() {
            tracing::trace!(port = %self.shared.port, id = %command.id(), "Port disconnected; failing command");
            command.resolve(Completion::NoResponse);
            return Ok(());
        }

        self.sender
            .send(command)
            .map_err(|_| BusError::disposed(self.port()))?;

        // Closed between the check above and the send: nothing will
        // drain the queue again.
        if self.is_disposed() {
            self.cancel_queued();
            return Err(BusError::disposed(self.port()));
        }
        Ok(())
    }

    /// Creates and queues a command, returning its handle.
    pub fn send(
        &self,
        request: impl Into<Vec<u8>>,
        expected_len: usize,
        timeout: Duration,
        priority: u8,
    ) -> BusResult<CommandHandle> {
        let (command, handle) = Command::new(request, expected_len, timeout, priority)?;
        self.submit(command)?;
        Ok(handle)
    }

    /// Sends a request and blocks until the response arrives.
    ///
    /// The caller waits at most the command timeout plus the configured
    /// caller margin; giving up is reported as `Ok(None)`.
    pub fn execute(
        &self,
        request: impl Into<Vec<u8>>,
        expected_len: usize,
        timeout: Duration,
        priority: u8,
    ) -> BusResult<Option<Vec<u8>>> {
        let handle = self.send(request, expected_len, timeout, priority)?;
        let wait = timeout + self.shared.tuning.caller_margin;
        match handle.wait(wait) {
            Err(BusError::WaitTimeout { .. }) => {
                tracing::debug!(port = %self.shared.port, wait_ms = wait.as_millis() as u64, "Caller gave up waiting");
                Ok(None)
            }
            other => other,
        }
    }

    /// Async variant of [`execute`](Self::execute).
    pub async fn execute_async(
        &self,
        request: impl Into<Vec<u8>>,
        expected_len: usize,
        timeout: Duration,
        priority: u8,
    ) -> BusResult<Option<Vec<u8>>> {
        let handle = self.send(request, expected_len, timeout, priority)?;
        let wait = timeout + self.shared.tuning.caller_margin;
        match handle.wait_async(wait).await {
            Err(BusError::WaitTimeout { .. }) => {
                tracing::debug!(port = %self.shared.port, wait_ms = wait.as_millis() as u64, "Caller gave up waiting");
                Ok(None)
            }
            other => other,
        }
    }

    /// Resolves every queued command as cancelled.
    fn cancel_queued(&self) -> usize {
        let mut cancelled = 0usize;
        while let Ok(command) = self.receiver.try_recv() {
            command.resolve(Completion::Cancelled);
            cancelled += 1;
        }
        cancelled
    }
}

impl Drop for PortChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PortChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortChannel")
            .field("port", &self.shared.port)
            .field("settings", &self.shared.settings)
            .field("connected", &self.is_connected())
            .field("disposed", &self.is_disposed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    shared: Arc<Shared>,
    queue: Receiver<Command>,
    port: Option<Box<dyn SerialIo>>,
    // Dropped on exit, which wakes `close`.
    _done: Sender<()>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(port = %self.shared.port, "Channel worker started");

        while !self.shared.is_disposed() {
            if self.port.is_none() {
                self.fail_pending(Completion::NoResponse);
                if !self.try_reconnect() {
                    self.backoff();
                    continue;
                }
            }

            match self.queue.recv_timeout(self.shared.tuning.dequeue_poll) {
                Ok(command) => self.execute(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.port = None;
        self.fail_pending(Completion::Cancelled);
        tracing::debug!(port = %self.shared.port, "Channel worker stopped");
    }

    fn execute(&mut self, command: Command) {
        let Some(port) = self.port.as_mut() else {
            command.resolve(Completion::NoResponse);
            return;
        };

        let started = Instant::now();
        let exchange = Exchange {
            request: command.request(),
            expected_len: command.expected_response_length(),
            timeout: command.timeout(),
        };
        let result = transaction::transact(&mut **port, exchange, &self.shared.settings, &self.shared.tuning);
        self.shared.processed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(response) if !response.is_empty() => {
                self.shared.consecutive_failures.store(0, Ordering::Relaxed);
                *self.shared.last_success.lock() = Some(Utc::now());
                tracing::trace!(
                    port = %self.shared.port,
                    id = %command.id(),
                    received = response.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command completed"
                );
                command.resolve(Completion::Response(response));
            }
            Ok(_) => {
                tracing::debug!(port = %self.shared.port, id = %command.id(), "No response");
                command.resolve(Completion::NoResponse);
                self.record_transient();
            }
            Err(e) => {
                command.resolve(Completion::NoResponse);
                match FaultKind::classify(&e) {
                    FaultKind::Critical => {
                        tracing::warn!(port = %self.shared.port, error = %e, "Critical I/O fault");
                        self.disconnect(ConnectionReason::CriticalFault);
                    }
                    FaultKind::Transient => {
                        tracing::debug!(port = %self.shared.port, error = %e, "Transient I/O fault");
                        self.record_transient();
                    }
                }
            }
        }
    }

    fn record_transient(&mut self) {
        let failures = self.shared.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let threshold = self.shared.tuning.failure_threshold;
        if failures >= threshold {
            tracing::warn!(
                port = %self.shared.port,
                failures,
                "Consecutive failure threshold reached"
            );
            self.disconnect(ConnectionReason::TransientThreshold);
        }
    }

    fn disconnect(&mut self, reason: ConnectionReason) {
        self.port = None;
        self.shared.connected.store(false, Ordering::Release);
        self.fail_pending(Completion::NoResponse);
        self.shared.event(false, reason);
    }

    fn try_reconnect(&mut self) -> bool {
        if self.shared.is_disposed() {
            return false;
        }

        let shared = Arc::clone(&self.shared);
        match shared.provider.available_ports() {
            Ok(names) if !names.iter().any(|name| name == &shared.port) => {
                tracing::trace!(port = %shared.port, "Port not present; skipping reconnect");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(port = %shared.port, error = %e, "Port enumeration failed");
            }
        }

        match shared.provider.open(&shared.port, &shared.settings) {
            Ok(handle) => {
                self.port = Some(handle);
                shared.consecutive_failures.store(0, Ordering::Relaxed);
                shared.connected.store(true, Ordering::Release);
                let reconnects = shared.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(port = %shared.port, reconnects, "Channel reconnected");
                shared.event(true, ConnectionReason::Reconnected);
                true
            }
            Err(e) => {
                tracing::debug!(port = %shared.port, error = %e, "Reconnect attempt failed");
                false
            }
        }
    }

    /// Sleeps for the reconnect backoff, waking early on close.
    fn backoff(&self) {
        let deadline = Instant::now() + self.shared.tuning.reconnect_backoff;
        let slice = self.shared.tuning.dequeue_poll;
        while !self.shared.is_disposed() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    fn fail_pending(&self, completion: Completion) {
        let mut failed = 0usize;
        while let Ok(command) = self.queue.try_recv() {
            command.resolve(completion.clone());
            failed += 1;
        }
        if failed > 0 {
            tracing::debug!(port = %self.shared.port, failed, "Failed queued commands");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
