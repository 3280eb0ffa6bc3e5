// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One request/response exchange on an open port.
//!
//! The exchange clears stale input, writes the request, waits the
//! minimum time the line needs, then actively polls `bytes_to_read`.
//! Reading ends when:
//!
//! - the expected number of bytes has arrived, or
//! - for responses of unknown length, the line stayed quiet for the
//!   quiescence window after data started arriving, or
//! - the command timeout elapsed.
//!
//! Driver level timeouts on `read` are folded into "nothing available";
//! every other I/O error is returned for classification.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crate::port::SerialIo;
use crate::types::{BusTuning, PortSettings};

const READ_CHUNK: usize = 256;

/// Parameters of a single exchange.
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    /// Bytes to transmit.
    pub request: &'a [u8],
    /// Expected response length, `0` if unknown.
    pub expected_len: usize,
    /// Response timeout measured from the end of the write.
    pub timeout: Duration,
}

/// Writes `exchange.request` and collects the response.
///
/// Returns the bytes received, possibly empty.
pub fn transact(
    port: &mut dyn SerialIo,
    exchange: Exchange<'_>,
    settings: &PortSettings,
    tuning: &BusTuning,
) -> io::Result<Vec<u8>> {
    port.clear_input()?;
    port.write_all(exchange.request)?;
    port.flush()?;

    let minimum_wait = tuning.minimum_wait(settings, exchange.request.len(), exchange.expected_len);
    read_response(port, exchange.expected_len, exchange.timeout, minimum_wait, tuning)
}

/// Collects a response after the request has been written.
pub fn read_response(
    port: &mut dyn SerialIo,
    expected_len: usize,
    timeout: Duration,
    minimum_wait: Duration,
    tuning: &BusTuning,
) -> io::Result<Vec<u8>> {
    let started = Instant::now();
    let deadline = started + timeout;

    thread::sleep(minimum_wait.min(timeout));

    let mut response = Vec::with_capacity(expected_len.max(16));
    let mut chunk = [0u8; READ_CHUNK];
    let mut last_data: Option<Instant> = None;

    loop {
        let available = port.bytes_to_read()?;
        if available > 0 {
            let want = available.min(READ_CHUNK);
            let read = match port.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(e) if is_read_timeout(&e) => 0,
                Err(e) => return Err(e),
            };

            if read > 0 {
                response.extend_from_slice(&chunk[..read]);
                last_data = Some(Instant::now());

                if expected_len > 0 && response.len() >= expected_len {
                    break;
                }
                continue;
            }
        }

        if expected_len == 0 {
            if let Some(at) = last_data {
                if at.elapsed() >= tuning.quiescence {
                    break;
                }
            }
        }

        if Instant::now() >= deadline {
            break;
        }

        thread::sleep(tuning.poll_interval);
    }

    tracing::trace!(
        received = response.len(),
        expected = expected_len,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Read response"
    );

    Ok(response)
}

fn is_read_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Port that releases one scripted chunk per `bytes_to_read` poll.
    struct ScriptedPort {
        written: Vec<u8>,
        chunks: VecDeque<Vec<u8>>,
        ready: Vec<u8>,
        cleared: bool,
    }

    impl ScriptedPort {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                written: Vec::new(),
                chunks: chunks.into(),
                ready: Vec::new(),
                cleared: false,
            }
        }
    }

    impl SerialIo for ScriptedPort {
        fn clear_input(&mut self) -> io::Result<()> {
            self.cleared = true;
            Ok(())
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn bytes_to_read(&mut self) -> io::Result<usize> {
            if self.ready.is_empty() {
                if let Some(next) = self.chunks.pop_front() {
                    self.ready = next;
                }
            }
            Ok(self.ready.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.ready.len());
            buf[..n].copy_from_slice(&self.ready[..n]);
            self.ready.drain(..n);
            Ok(n)
        }
    }

    fn fast_tuning() -> BusTuning {
        BusTuning {
            min_wait_floor: Duration::from_millis(1),
            device_margin: Duration::ZERO,
            ..Default::default()
        }
    }

    fn exchange(request: &[u8], expected_len: usize, timeout: Duration) -> Exchange<'_> {
        Exchange {
            request,
            expected_len,
            timeout,
        }
    }

    #[test]
    fn test_returns_when_expected_length_reached() {
        let mut port = ScriptedPort::new(vec![vec![1, 2, 3], vec![4, 5], vec![6, 7, 8]]);
        let settings = PortSettings::default();
        let started = Instant::now();

        let response = transact(
            &mut port,
            exchange(&[0xAA, 0xBB], 5, Duration::from_secs(1)),
            &settings,
            &fast_tuning(),
        )
        .unwrap();

        assert_eq!(response, vec![1, 2, 3, 4, 5]);
        assert_eq!(port.written, vec![0xAA, 0xBB]);
        assert!(port.cleared);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_length_ends_on_quiescence() {
        let mut port = ScriptedPort::new(vec![vec![1, 2], vec![3]]);
        let settings = PortSettings::default();
        let started = Instant::now();

        let response = transact(
            &mut port,
            exchange(&[0x01], 0, Duration::from_secs(2)),
            &settings,
            &fast_tuning(),
        )
        .unwrap();

        assert_eq!(response, vec![1, 2, 3]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_silent_device_returns_empty_after_timeout() {
        let mut port = ScriptedPort::new(Vec::new());
        let settings = PortSettings::default();
        let timeout = Duration::from_millis(40);
        let started = Instant::now();

        let response = transact(&mut port, exchange(&[0x01], 7, timeout), &settings, &fast_tuning()).unwrap();

        assert!(response.is_empty());
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn test_partial_response_is_returned() {
        let mut port = ScriptedPort::new(vec![vec![1, 2]]);
        let settings = PortSettings::default();

        let response = transact(
            &mut port,
            exchange(&[0x01], 7, Duration::from_millis(30)),
            &settings,
            &fast_tuning(),
        )
        .unwrap();

        assert_eq!(response, vec![1, 2]);
    }
}
