//! Serial transport for lever firmware
//!
//! The worker thread only sees the [`SerialTransport`] and
//! [`LeverConnection`] traits, so tests and the rig's mock mode can swap
//! the real port for [`crate::MockTransport`].

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Opens connections to named ports
pub trait SerialTransport: Send + Sync {
    /// Open `port` with the given baud rate and read/write timeout
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LeverConnection>, ProtocolError>;
}

/// An open, line-oriented link to one lever
pub trait LeverConnection: Send {
    /// Send a command string
    fn write_text(&mut self, text: &str) -> Result<(), ProtocolError>;

    /// Read one line, without its terminator, waiting at most the
    /// connection timeout
    fn read_line(&mut self) -> Result<String, ProtocolError>;

    /// Whether the underlying port is still usable
    fn is_open(&self) -> bool;
}

/// A serial port as reported by the operating system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Name to pass to `open` (e.g., "/dev/ttyACM0" or "COM3")
    pub port: String,
    /// Human-readable description
    pub description: String,
}

/// List the serial ports present on this machine
pub fn list_ports() -> Result<Vec<PortDescriptor>, ProtocolError> {
    let ports = serialport::available_ports()?;
    debug!("Found {} serial ports", ports.len());

    Ok(ports
        .into_iter()
        .map(|info| {
            let description = match info.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                other => format!("{:?}", other),
            };
            PortDescriptor {
                port: info.port_name,
                description,
            }
        })
        .collect())
}

/// Transport backed by the operating system's serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortTransport;

impl SerialTransport for SerialPortTransport {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LeverConnection>, ProtocolError> {
        info!("Opening serial port {} at {} baud", port, baud_rate);

        let handle = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        Ok(Box::new(SerialLineConnection {
            link: LineLink::new(handle, port, timeout),
        }))
    }
}

/// Line framing and error classification over a byte stream.
///
/// A hard I/O error closes the link for good; `TimedOut` never does.
struct LineLink<P> {
    io: P,
    name: String,
    timeout: Duration,
    /// Bytes received past the last returned line
    pending: Vec<u8>,
    open: bool,
}

impl<P: Read + Write> LineLink<P> {
    fn new(io: P, name: &str, timeout: Duration) -> Self {
        Self {
            io,
            name: name.to_string(),
            timeout,
            pending: Vec::with_capacity(128),
            open: true,
        }
    }

    fn fail(&mut self, err: io::Error) -> ProtocolError {
        warn!("Serial port {} failed: {}", self.name, err);
        self.open = false;
        err.into()
    }

    fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotOpen);
        }

        // Leftovers of a reply that arrived after its read timed out must
        // not be taken for the answer to this command.
        self.pending.clear();

        match self.io.write_all(text.as_bytes()).and_then(|_| self.io.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(e.into()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn read_line(&mut self) -> Result<String, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotOpen);
        }

        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 64];

        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                return Ok(String::from_utf8_lossy(&line).trim_end().to_string());
            }

            if Instant::now() >= deadline {
                debug!("No line from {} within {:?}", self.name, self.timeout);
                return Err(ProtocolError::Timeout(self.timeout.as_millis() as u64));
            }

            match self.io.read(&mut chunk) {
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
    }
}

/// Line-oriented connection on a real serial port
struct SerialLineConnection {
    link: LineLink<Box<dyn SerialPort>>,
}

impl LeverConnection for SerialLineConnection {
    fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if self.link.open {
            self.link.io.clear(ClearBuffer::Input)?;
        }
        self.link.write_text(text)
    }

    fn read_line(&mut self) -> Result<String, ProtocolError> {
        self.link.read_line()
    }

    fn is_open(&self) -> bool {
        self.link.open
    }
}

impl Drop for SerialLineConnection {
    fn drop(&mut self) {
        info!("Closing serial port {}", self.link.name);
    }
}
