//! Transport abstraction
//!
//! The protocol only talks to the device through [`Transport`], so sessions can
//! run over a real serial port or over a scripted channel in tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{TransportError, DEFAULT_TIMEOUT_MS};

/// Parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Stop bit setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

/// Line settings for one transport handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub byte_size: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Timeout applied to a single blocking read on the port
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// RTS level right after opening
    pub rts_initial: bool,
    /// DTR level right after opening
    pub dtr_initial: bool,
    /// Use RTS/CTS flow control
    pub hardware_flow_control: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: super::DEFAULT_BAUD_RATES[0],
            byte_size: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rts_initial: false,
            dtr_initial: false,
            hardware_flow_control: false,
        }
    }
}

impl SerialConfig {
    /// Same settings at a different baud rate
    pub fn with_baud(&self, baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..self.clone()
        }
    }
}

/// Byte-oriented full-duplex channel to the device
pub trait Transport: Send {
    /// Drive the RTS line
    fn set_rts(&mut self, level: bool) -> Result<(), TransportError>;

    /// Drive the DTR line
    fn set_dtr(&mut self, level: bool) -> Result<(), TransportError>;

    /// Discard unread input
    fn flush_input(&mut self) -> Result<(), TransportError>;

    /// Discard unsent output
    fn flush_output(&mut self) -> Result<(), TransportError>;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying handle
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Acquires transports; one call per baud rate during a handshake
pub trait TransportFactory {
    /// Open a transport with the given settings
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: FnMut(&SerialConfig) -> Result<Box<dyn Transport>, TransportError>,
{
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, TransportError> {
        self(config)
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
