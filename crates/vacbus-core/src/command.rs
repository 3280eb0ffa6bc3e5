// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Commands and their one-shot completion.
//!
//! A [`Command`] is one request/response exchange. Creating it yields a
//! [`CommandHandle`] that the caller keeps while the command travels to a
//! channel worker. The worker resolves the command exactly once; every
//! later resolution attempt is ignored. A command dropped without being
//! resolved completes as [`Completion::Cancelled`], so a waiter is never
//! left hanging.
//!
//! ```
//! use std::time::Duration;
//! use vacbus_core::command::{priority, Command};
//!
//! let (command, handle) = Command::new(vec![0x01, 0x03], 7, Duration::from_millis(200), priority::NORMAL).unwrap();
//! drop(command);
//! assert_eq!(handle.wait(Duration::from_millis(10)).unwrap(), None);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{BusError, BusResult};

/// Command priority levels. Lower values are more urgent.
pub mod priority {
    /// Emergency stop and other safety actions.
    pub const EMERGENCY: u8 = 0;
    /// User initiated control actions.
    pub const CONTROL: u8 = 1;
    /// Regular traffic.
    pub const NORMAL: u8 = 5;
    /// Background polling.
    pub const BACKGROUND: u8 = 10;
}

// =============================================================================
// Completion
// =============================================================================

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The device answered.
    Response(Vec<u8>),
    /// No answer arrived, or the channel was not connected.
    NoResponse,
    /// The command was dropped or discarded before execution.
    Cancelled,
}

impl Completion {
    /// Returns the response bytes, if any.
    pub fn into_response(self) -> Option<Vec<u8>> {
        match self {
            Completion::Response(bytes) => Some(bytes),
            Completion::NoResponse | Completion::Cancelled => None,
        }
    }

    /// Returns `true` if the device answered.
    pub fn is_response(&self) -> bool {
        matches!(self, Completion::Response(_))
    }
}

// =============================================================================
// ResponseSlot
// =============================================================================

enum SlotState {
    Pending,
    Resolved(Completion),
    Taken,
}

/// Write-once result cell shared between a command and its handle.
///
/// Blocking waiters park on the condvar; async waiters on the notify.
struct ResponseSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
    notify: Notify,
}

impl ResponseSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Stores `completion` unless already resolved. Returns `true` on the
    /// first call only.
    fn resolve(&self, completion: Completion) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(*state, SlotState::Pending) {
                return false;
            }
            *state = SlotState::Resolved(completion);
        }
        self.ready.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn is_resolved(&self) -> bool {
        !matches!(*self.state.lock(), SlotState::Pending)
    }

    fn take(state: &mut SlotState) -> Option<Completion> {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Resolved(completion) => Some(completion),
            SlotState::Pending => {
                *state = SlotState::Pending;
                None
            }
            SlotState::Taken => Some(Completion::Cancelled),
        }
    }

    fn wait(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(completion) = Self::take(&mut state) {
                return Some(completion);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return Self::take(&mut state);
            }
        }
    }

    async fn resolved(&self) -> Completion {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = Self::take(&mut self.state.lock());
            if let Some(completion) = taken {
                return completion;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// A request to transmit plus its completion slot.
pub struct Command {
    id: Uuid,
    request: Vec<u8>,
    expected_response_length: usize,
    timeout: Duration,
    priority: u8,
    created_at: Instant,
    timestamp: DateTime<Utc>,
    slot: Arc<ResponseSlot>,
}

impl Command {
    /// Creates a command and the handle used to await its result.
    ///
    /// `expected_response_length == 0` means the length is unknown and the
    /// response ends after a short silence on the line.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::EmptyRequest`] if `request` is empty.
    pub fn new(
        request: impl Into<Vec<u8>>,
        expected_response_length: usize,
        timeout: Duration,
        priority: u8,
    ) -> BusResult<(Self, CommandHandle)> {
        let request = request.into();
        if request.is_empty() {
            return Err(BusError::EmptyRequest);
        }

        let id = Uuid::now_v7();
        let slot = Arc::new(ResponseSlot::new());
        let command = Self {
            id,
            request,
            expected_response_length,
            timeout,
            priority,
            created_at: Instant::now(),
            timestamp: Utc::now(),
            slot: Arc::clone(&slot),
        };

        Ok((command, CommandHandle { id, timeout, slot }))
    }

    /// Unique command id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bytes to transmit.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Expected response length, `0` if unknown.
    pub fn expected_response_length(&self) -> usize {
        self.expected_response_length
    }

    /// Response timeout measured from the end of the write.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Priority (lower is more urgent).
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Wall clock time of creation.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Time since creation.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns `true` once the command has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }

    /// Resolves the command. Only the first resolution takes effect.
    pub(crate) fn resolve(self, completion: Completion) -> bool {
        self.slot.resolve(completion)
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.slot.resolve(Completion::Cancelled);
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("request_len", &self.request.len())
            .field("expected_response_length", &self.expected_response_length)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .finish()
    }
}

// =============================================================================
// CommandHandle
// =============================================================================

/// Caller side of a [`Command`].
pub struct CommandHandle {
    id: Uuid,
    timeout: Duration,
    slot: Arc<ResponseSlot>,
}

impl CommandHandle {
    /// Id of the command this handle belongs to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` once the command has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }

    /// Blocks until the command resolves or `wait` elapses.
    pub fn wait_completion(self, wait: Duration) -> BusResult<Completion> {
        self.slot
            .wait(wait)
            .ok_or(BusError::WaitTimeout { duration: wait })
    }

    /// Blocks until the command resolves and returns the response bytes.
    ///
    /// Returns `Ok(None)` when the device did not answer or the command
    /// was cancelled.
    pub fn wait(self, wait: Duration) -> BusResult<Option<Vec<u8>>> {
        self.wait_completion(wait).map(Completion::into_response)
    }

    /// Awaits resolution without a deadline.
    pub async fn completion(self) -> Completion {
        self.slot.resolved().await
    }

    /// Awaits resolution for at most `wait`.
    pub async fn wait_async(self, wait: Duration) -> BusResult<Option<Vec<u8>>> {
        match tokio::time::timeout(wait, self.slot.resolved()).await {
            Ok(completion) => Ok(completion.into_response()),
            Err(_) => Err(BusError::WaitTimeout { duration: wait }),
        }
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
