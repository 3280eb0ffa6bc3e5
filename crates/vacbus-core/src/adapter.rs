// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Port-like facade over a shared channel.
//!
//! Device drivers written against a dedicated serial port expect
//! `write` followed by `read`. A [`CommunicationAdapter`] keeps that
//! surface while several devices share one [`PortChannel`]:
//!
//! - `write` only buffers the request locally.
//! - `read_all` / `read` turn the buffered request into one command and
//!   wait for its response.
//! - `connect` opens the shared channel; `disconnect` only drops the
//!   buffered request, since other devices may still use the port.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::channel::PortChannel;
use crate::command::priority;
use crate::error::{BusError, BusResult};
use crate::events::ConnectionEvent;

/// Per-device adapter bound to a shared channel.
pub struct CommunicationAdapter {
    device: String,
    channel: Arc<PortChannel>,
    pending: Mutex<Option<Vec<u8>>>,
    timeout: Mutex<Duration>,
    expected_len: AtomicUsize,
    priority: AtomicU8,
}

impl CommunicationAdapter {
    /// Creates an adapter for `device` on `channel`.
    pub fn new(device: impl Into<String>, channel: Arc<PortChannel>, timeout: Duration) -> Self {
        Self {
            device: device.into(),
            channel,
            pending: Mutex::new(None),
            timeout: Mutex::new(timeout),
            expected_len: AtomicUsize::new(0),
            priority: AtomicU8::new(priority::NORMAL),
        }
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Port name of the underlying channel.
    pub fn port(&self) -> &str {
        self.channel.port()
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Arc<PortChannel> {
        &self.channel
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Opens the shared channel. Returns whether it is connected.
    pub fn connect(&self) -> BusResult<bool> {
        self.channel.open()
    }

    /// Drops the buffered request. The shared channel stays open.
    pub fn disconnect(&self) {
        self.pending.lock().take();
    }

    /// Returns `true` if the shared channel is connected.
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Subscribes to the shared channel's connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.channel.subscribe()
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Sets the response timeout for subsequent reads.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// Current response timeout.
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    /// Sets the response length used by [`read_all`](Self::read_all).
    /// `0` means unknown.
    pub fn set_expected_response_length(&self, len: usize) {
        self.expected_len.store(len, Ordering::Relaxed);
    }

    /// Expected response length used by [`read_all`](Self::read_all).
    pub fn expected_response_length(&self) -> usize {
        self.expected_len.load(Ordering::Relaxed)
    }

    /// Sets the priority of commands built from buffered writes.
    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    // =========================================================================
    // Buffered I/O
    // =========================================================================

    /// Buffers `data` as (part of) the next request.
    pub fn write(&self, data: &[u8]) {
        self.pending
            .lock()
            .get_or_insert_with(Vec::new)
            .extend_from_slice(data);
    }

    /// Buffers `count` bytes of `data` starting at `offset`.
    pub fn write_range(&self, data: &[u8], offset: usize, count: usize) -> BusResult<()> {
        let end = offset
            .checked_add(count)
            .filter(|end| *end <= data.len())
            .ok_or(BusError::OutOfRange {
                offset,
                count,
                len: data.len(),
            })?;
        self.write(&data[offset..end]);
        Ok(())
    }

    /// Sends the buffered request and returns the whole response.
    ///
    /// # Errors
    ///
    /// [`BusError::NoPendingRequest`] if nothing was written since the
    /// last read.
    pub fn read_all(&self) -> BusResult<Option<Vec<u8>>> {
        let request = self.take_pending()?;
        self.channel
            .execute(request, self.expected_response_length(), self.timeout(), self.current_priority())
    }

    /// Sends the buffered request and returns at most `count` bytes.
    pub fn read(&self, count: usize) -> BusResult<Option<Vec<u8>>> {
        let request = self.take_pending()?;
        let response = self
            .channel
            .execute(request, count, self.timeout(), self.current_priority())?;
        Ok(response.map(|mut bytes| {
            bytes.truncate(count);
            bytes
        }))
    }

    /// Async variant of [`read_all`](Self::read_all).
    pub async fn read_all_async(&self) -> BusResult<Option<Vec<u8>>> {
        let request = self.take_pending()?;
        self.channel
            .execute_async(request, self.expected_response_length(), self.timeout(), self.current_priority())
            .await
    }

    /// Async variant of [`read`](Self::read).
    pub async fn read_async(&self, count: usize) -> BusResult<Option<Vec<u8>>> {
        let request = self.take_pending()?;
        let response = self
            .channel
            .execute_async(request, count, self.timeout(), self.current_priority())
            .await?;
        Ok(response.map(|mut bytes| {
            bytes.truncate(count);
            bytes
        }))
    }

    /// No-op: stale input is cleared by the channel before every write.
    pub fn discard_in_buffer(&self) {}

    /// No-op: output is flushed by the channel after every write.
    pub fn discard_out_buffer(&self) {}

    // =========================================================================
    // Direct Submission
    // =========================================================================

    /// Sends `request` directly with the given priority, bypassing the
    /// write buffer.
    pub fn send_priority(&self, request: &[u8], expected_len: usize, priority: u8) -> BusResult<Option<Vec<u8>>> {
        self.channel.execute(request, expected_len, self.timeout(), priority)
    }

    /// Async variant of [`send_priority`](Self::send_priority).
    pub async fn send_priority_async(
        &self,
        request: &[u8],
        expected_len: usize,
        priority: u8,
    ) -> BusResult<Option<Vec<u8>>> {
        self.channel
            .execute_async(request, expected_len, self.timeout(), priority)
            .await
    }

    fn take_pending(&self) -> BusResult<Vec<u8>> {
        self.pending
            .lock()
            .take()
            .filter(|request| !request.is_empty())
            .ok_or_else(|| BusError::no_pending_request(&self.device))
    }

    fn current_priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CommunicationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationAdapter")
            .field("device", &self.device)
            .field("port", &self.channel.port())
            .field("timeout", &self.timeout())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortProvider, SerialIo};
    use crate::types::{BusTuning, PortSettings};
    use std::io;

    struct Reply(Vec<u8>, Vec<u8>);

    impl SerialIo for Reply {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            self.1 = self.0.clone();
            Ok(())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(self.1.len())
        }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.1.len());
            buf[..n].copy_from_slice(&self.1[..n]);
            self.1.drain(..n);
            Ok(n)
        }
    }

    struct Provider;

    impl PortProvider for Provider {
        fn available_ports(&self) -> io::Result<Vec<String>> {
            Ok(vec!["COM2".into()])
        }
        fn open(&self, _port: &str, _settings: &PortSettings) -> io::Result<Box<dyn SerialIo>> {
            Ok(Box::new(Reply(vec![9, 8, 7, 6], Vec::new())))
        }
    }

    fn adapter() -> CommunicationAdapter {
        let tuning = BusTuning {
            min_wait_floor: Duration::from_millis(1),
            device_margin: Duration::ZERO,
            ..Default::default()
        };
        let channel = Arc::new(PortChannel::new("COM2", PortSettings::default(), Arc::new(Provider), tuning));
        CommunicationAdapter::new("Bath", channel, Duration::from_millis(100))
    }

    #[test]
    fn test_read_without_write_fails() {
        let adapter = adapter();
        adapter.connect().unwrap();
        assert!(matches!(adapter.read_all(), Err(BusError::NoPendingRequest { .. })));
    }

    #[test]
    fn test_write_then_read() {
        let adapter = adapter();
        assert!(adapter.connect().unwrap());
        adapter.set_expected_response_length(4);

        adapter.write(&[0x01]);
        adapter.write_range(&[0x00, 0x03, 0x04], 1, 2).unwrap();
        assert_eq!(adapter.read_all().unwrap(), Some(vec![9, 8, 7, 6]));

        adapter.write(&[0x01]);
        assert_eq!(adapter.read(2).unwrap(), Some(vec![9, 8]));
    }

    #[test]
    fn test_disconnect_drops_buffer_only() {
        let adapter = adapter();
        adapter.connect().unwrap();
        adapter.write(&[0x01]);
        adapter.disconnect();

        assert!(adapter.is_connected());
        assert!(matches!(adapter.read_all(), Err(BusError::NoPendingRequest { .. })));
    }

    #[test]
    fn test_write_range_bounds() {
        let adapter = adapter();
        assert!(matches!(
            adapter.write_range(&[1, 2, 3], 2, 5),
            Err(BusError::OutOfRange { offset: 2, count: 5, len: 3 })
        ));
    }
}
