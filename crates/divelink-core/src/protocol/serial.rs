//! Serial port handling
//!
//! Binds [`Transport`] to the `serialport` crate and enumerates candidate
//! download cables.

use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};

use super::transport::{Parity, SerialConfig, StopBits, Transport, TransportFactory};
use super::TransportError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/cu.usbserial-00085C7C" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing USB-serial adapters first:
///  - cu.usbserial* (macOS callout devices)
///  - ttyUSB* (sorted numerically)
///  - ttyACM* (sorted numerically)
///  - everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if basename.starts_with("cu.usbserial") {
        return (0, 0, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (2, num, basename.to_string());
    }
    (3, 0, basename.to_string())
}

/// List available serial ports, USB-serial adapters first
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux: pick up adapters the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn port_error(e: serialport::Error) -> TransportError {
    TransportError::Io(e.into())
}

fn data_bits(byte_size: u8) -> Option<DataBits> {
    match byte_size {
        5 => Some(DataBits::Five),
        6 => Some(DataBits::Six),
        7 => Some(DataBits::Seven),
        8 => Some(DataBits::Eight),
        _ => None,
    }
}

/// A serial port driven through the `serialport` crate
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `path` with the given line settings
    pub fn open(path: &str, config: &SerialConfig) -> Result<Self, TransportError> {
        let open_error = |reason: String| TransportError::Open {
            path: path.to_string(),
            reason,
        };

        let bits = data_bits(config.byte_size)
            .ok_or_else(|| open_error(format!("unsupported byte size {}", config.byte_size)))?;
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let flow = if config.hardware_flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let mut port = serialport::new(path, config.baud_rate)
            .data_bits(bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| open_error(e.to_string()))?;

        // Initial line levels; the negotiator clears both again before use
        if let Err(e) = port.write_request_to_send(config.rts_initial) {
            tracing::debug!("serial: initial RTS not applied on {}: {}", path, e);
        }
        if let Err(e) = port.write_data_terminal_ready(config.dtr_initial) {
            tracing::debug!("serial: initial DTR not applied on {}: {}", path, e);
        }

        tracing::debug!(
            "serial: opened {} at {} baud, {}-{:?}-{:?}",
            path,
            config.baud_rate,
            config.byte_size,
            config.parity,
            config.stop_bits
        );

        Ok(Self { port: Some(port) })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn set_rts(&mut self, level: bool) -> Result<(), TransportError> {
        self.port()?.write_request_to_send(level).map_err(port_error)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), TransportError> {
        self.port()?
            .write_data_terminal_ready(level)
            .map_err(port_error)
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Input).map_err(port_error)
    }

    fn flush_output(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::Output).map_err(port_error)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let port = self.port()?;
        let written = port.write(bytes)?;
        port.flush()?;
        Ok(written)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port()?.bytes_to_read().map_err(port_error)? as usize)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        match self.port()?.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the handle closes the device
        self.port = None;
        Ok(())
    }
}

/// Opens [`SerialTransport`]s on a fixed device path
#[derive(Debug, Clone)]
pub struct SerialPortFactory {
    /// Device path
    pub path: String,
}

impl SerialPortFactory {
    /// Create a factory for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl TransportFactory for SerialPortFactory {
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(&self.path, config)?))
    }
}
