// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial port abstraction.
//!
//! Channel workers and port detection talk to hardware through two small
//! traits:
//!
//! - [`SerialIo`]: an open port handle, owned by exactly one thread.
//! - [`PortProvider`]: enumerates port names and opens handles.
//!
//! [`SystemPorts`] is the production provider backed by the `serialport`
//! crate. Tests substitute simulated ports.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::ClearBuffer;

use crate::types::PortSettings;

// =============================================================================
// SerialIo Trait
// =============================================================================

/// Blocking operations on an open serial port.
///
/// All methods are called from a single owning thread; implementations
/// only need to be `Send`.
pub trait SerialIo: Send {
    /// Discards any bytes waiting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Writes the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flushes pending output to the line.
    fn flush(&mut self) -> io::Result<()>;

    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Reads up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

// =============================================================================
// PortProvider Trait
// =============================================================================

/// Source of serial ports.
pub trait PortProvider: Send + Sync {
    /// Returns the names of the serial ports currently present.
    fn available_ports(&self) -> io::Result<Vec<String>>;

    /// Opens `port` with the given settings.
    fn open(&self, port: &str, settings: &PortSettings) -> io::Result<Box<dyn SerialIo>>;
}

// =============================================================================
// SystemPorts
// =============================================================================

/// Provider for the host's real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl SystemPorts {
    /// Creates a new system port provider.
    pub fn new() -> Self {
        Self
    }
}

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        let mut names: Vec<String> = ports.into_iter().map(|info| info.port_name).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn open(&self, port: &str, settings: &PortSettings) -> io::Result<Box<dyn SerialIo>> {
        let handle = serialport::new(port, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(settings.handshake.into())
            .timeout(settings.read_timeout)
            .open()?;

        tracing::debug!(port = %port, settings = %settings, "Opened serial port");

        Ok(Box::new(SystemPort::new(port, handle, settings)))
    }
}

// =============================================================================
// SystemPort
// =============================================================================

/// Driver operations [`SystemPort`] needs from a raw handle.
trait RawPort: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn clear_input(&mut self) -> io::Result<()>;
    fn bytes_to_read(&mut self) -> io::Result<usize>;
}

impl RawPort for Box<dyn serialport::SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(&mut **self, timeout)?;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(serialport::SerialPort::bytes_to_read(&**self)? as usize)
    }
}

/// Open host port.
///
/// `serialport` keeps a single timeout per handle. It holds the read
/// timeout and is switched to the write timeout for the duration of a
/// write when the two differ.
struct SystemPort<P = Box<dyn serialport::SerialPort>> {
    name: String,
    inner: P,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<P: RawPort> SystemPort<P> {
    fn new(name: &str, inner: P, settings: &PortSettings) -> Self {
        Self {
            name: name.to_string(),
            inner,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        }
    }
}

impl<P> fmt::Debug for SystemPort<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemPort").field("name", &self.name).finish()
    }
}

impl<P: RawPort> SerialIo for SystemPort<P> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.inner.clear_input()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.write_timeout == self.read_timeout {
            return Write::write_all(&mut self.inner, data);
        }

        self.inner.set_timeout(self.write_timeout)?;
        let written = Write::write_all(&mut self.inner, data);
        self.inner.set_timeout(self.read_timeout)?;
        written
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.inner)
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.inner.bytes_to_read()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.inner, buf)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Parity;

    #[derive(Default)]
    struct RecordingPort {
        /// Timeout in force at each write.
        writes: Vec<Duration>,
        timeout: Duration,
        calls: Vec<Duration>,
    }

    impl Read for RecordingPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for RecordingPort {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.writes.push(self.timeout);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl RawPort for RecordingPort {
        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            self.calls.push(timeout);
            Ok(())
        }
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_write_uses_write_timeout() {
        let settings = PortSettings::builder()
            .baud_rate(19200)
            .parity(Parity::Even)
            .read_timeout(Duration::from_millis(200))
            .write_timeout(Duration::from_millis(900))
            .build()
            .unwrap();
        let raw = RecordingPort {
            timeout: settings.read_timeout,
            ..Default::default()
        };
        let mut port = SystemPort::new("COM1", raw, &settings);

        port.write_all(&[0x01, 0x03]).unwrap();

        assert_eq!(port.inner.writes, vec![Duration::from_millis(900)]);
        assert_eq!(port.inner.timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_equal_timeouts_skip_switching() {
        let settings = PortSettings::new(9600, Parity::None);
        let raw = RecordingPort {
            timeout: settings.read_timeout,
            ..Default::default()
        };
        let mut port = SystemPort::new("COM2", raw, &settings);

        port.write_all(&[0xAA]).unwrap();

        assert!(port.inner.calls.is_empty());
        assert_eq!(port.inner.writes, vec![settings.read_timeout]);
    }
}
