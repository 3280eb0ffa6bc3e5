// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Line settings and bus timing.
//!
//! [`PortSettings`] describes how a serial line is opened and is fixed for
//! the lifetime of a channel. [`BusTuning`] collects the timing constants
//! used by every channel worker: settle times, polling intervals, failure
//! thresholds and reconnect backoff.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Baud rates accepted by [`PortSettings::validate`].
pub const VALID_BAUD_RATES: &[u32] = &[
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400,
];

// =============================================================================
// PortSettings
// =============================================================================

/// Serial line configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits.
    #[serde(default)]
    pub data_bits: DataBits,

    /// Parity.
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,

    /// Flow control.
    #[serde(default)]
    pub handshake: Handshake,

    /// Driver-level read timeout.
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Driver-level write timeout.
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_io_timeout() -> Duration {
    Duration::from_millis(500)
}

impl PortSettings {
    /// Creates 8-data-bit, 1-stop-bit settings with the given baud rate and parity.
    pub fn new(baud_rate: u32, parity: Parity) -> Self {
        Self {
            baud_rate,
            parity,
            ..Default::default()
        }
    }

    /// Creates a new builder.
    pub fn builder() -> PortSettingsBuilder {
        PortSettingsBuilder::default()
    }

    /// Number of bits on the wire per character (start + data + parity + stop).
    pub const fn character_bits(&self) -> u32 {
        1 + self.data_bits.bits() as u32 + self.parity.bits() as u32 + self.stop_bits.bits() as u32
    }

    /// Time needed to move `bytes` characters over the line.
    pub fn transmit_time(&self, bytes: usize) -> Duration {
        if self.baud_rate == 0 {
            return Duration::ZERO;
        }
        let bits = bytes as u64 * u64::from(self.character_bits());
        Duration::from_micros(bits * 1_000_000 / u64::from(self.baud_rate))
    }

    /// Validates these settings.
    pub fn validate(&self) -> BusResult<()> {
        if !VALID_BAUD_RATES.contains(&self.baud_rate) {
            return Err(BusError::invalid_settings(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }

        if self.read_timeout.is_zero() {
            return Err(BusError::invalid_settings("read_timeout must be non-zero"));
        }

        Ok(())
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            handshake: Handshake::default(),
            read_timeout: default_io_timeout(),
            write_timeout: default_io_timeout(),
        }
    }
}

impl fmt::Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Builder for [`PortSettings`].
#[derive(Debug, Default)]
pub struct PortSettingsBuilder {
    baud_rate: Option<u32>,
    data_bits: Option<DataBits>,
    parity: Option<Parity>,
    stop_bits: Option<StopBits>,
    handshake: Option<Handshake>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl PortSettingsBuilder {
    /// Sets the baud rate.
    pub fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = Some(rate);
        self
    }

    /// Sets the data bits.
    pub fn data_bits(mut self, bits: DataBits) -> Self {
        self.data_bits = Some(bits);
        self
    }

    /// Sets the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = Some(parity);
        self
    }

    /// Sets the stop bits.
    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = Some(bits);
        self
    }

    /// Sets the flow control.
    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Sets the driver read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the driver write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Builds and validates the settings.
    pub fn build(self) -> BusResult<PortSettings> {
        let settings = PortSettings {
            baud_rate: self.baud_rate.unwrap_or_else(default_baud_rate),
            data_bits: self.data_bits.unwrap_or_default(),
            parity: self.parity.unwrap_or_default(),
            stop_bits: self.stop_bits.unwrap_or_default(),
            handshake: self.handshake.unwrap_or_default(),
            read_timeout: self.read_timeout.unwrap_or_else(default_io_timeout),
            write_timeout: self.write_timeout.unwrap_or_else(default_io_timeout),
        };

        settings.validate()?;
        Ok(settings)
    }
}

// =============================================================================
// Line Parameters
// =============================================================================

/// Data bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits (default).
    #[default]
    Eight,
}

impl DataBits {
    /// Returns the number of bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity (default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Returns the number of parity bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Odd | Self::Even => 1,
        }
    }

    /// Returns the short character representation.
    pub const fn char(&self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.char())
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Stop bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// 1 stop bit (default).
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Returns the number of stop bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Handshake {
    /// No flow control (default).
    #[default]
    None,
    /// XON/XOFF software flow control.
    Software,
    /// RTS/CTS hardware flow control.
    Hardware,
}

impl From<Handshake> for serialport::FlowControl {
    fn from(handshake: Handshake) -> Self {
        match handshake {
            Handshake::None => serialport::FlowControl::None,
            Handshake::Software => serialport::FlowControl::Software,
            Handshake::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

// =============================================================================
// BusTuning
// =============================================================================

/// Timing constants shared by all channel workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusTuning {
    /// Lower bound of the settle time after a write.
    #[serde(with = "humantime_serde")]
    pub min_wait_floor: Duration,

    /// Device processing margin added to the computed transmit time.
    #[serde(with = "humantime_serde")]
    pub device_margin: Duration,

    /// Silence that ends a response of unknown length.
    #[serde(with = "humantime_serde")]
    pub quiescence: Duration,

    /// Sleep between `bytes_to_read` polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long the worker blocks waiting for the next command.
    #[serde(with = "humantime_serde")]
    pub dequeue_poll: Duration,

    /// Consecutive transient failures that force a disconnect.
    pub failure_threshold: u32,

    /// Delay between reconnect attempts.
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,

    /// Extra time a caller waits beyond the command timeout.
    #[serde(with = "humantime_serde")]
    pub caller_margin: Duration,

    /// Bound on joining a worker thread during close.
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
}

impl Default for BusTuning {
    fn default() -> Self {
        Self {
            min_wait_floor: Duration::from_millis(5),
            device_margin: Duration::from_millis(5),
            quiescence: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            dequeue_poll: Duration::from_millis(50),
            failure_threshold: 3,
            reconnect_backoff: Duration::from_secs(3),
            caller_margin: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl BusTuning {
    /// Settle time before the first `bytes_to_read` poll.
    ///
    /// The request and the expected answer have to cross the line before
    /// anything useful can be read; `expected_len == 0` only counts the
    /// request.
    pub fn minimum_wait(&self, settings: &PortSettings, request_len: usize, expected_len: usize) -> Duration {
        let wire = settings.transmit_time(request_len + expected_len);
        (wire + self.device_margin).max(self.min_wait_floor)
    }

    /// Validates the tuning values.
    pub fn validate(&self) -> BusResult<()> {
        if self.failure_threshold == 0 {
            return Err(BusError::invalid_settings("failure_threshold must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(BusError::invalid_settings("poll_interval must be non-zero"));
        }
        if self.dequeue_poll.is_zero() {
            return Err(BusError::invalid_settings("dequeue_poll must be non-zero"));
        }
        if self.quiescence < self.poll_interval {
            return Err(BusError::invalid_settings(
                "quiescence must not be shorter than poll_interval",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
