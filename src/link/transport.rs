//! Byte transports underneath the link manager
//!
//! The manager only needs a duplex byte stream that can report how many bytes
//! are waiting and can be cloned into a second handle for the reader thread.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::protocol::BaudRate;

/// A duplex byte stream to the peer
pub trait Transport: Read + Write + Send {
    /// Bytes received and not yet read
    fn bytes_to_read(&self) -> io::Result<u32>;

    /// Open a second handle onto the same device
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>>;
}

/// Creates transports for named devices
pub trait PortOpener: Send + Sync {
    fn open(&self, device: &str, baud: BaudRate) -> io::Result<Box<dyn Transport>>;

    /// Names of devices currently present on the host
    fn available_devices(&self) -> io::Result<Vec<String>>;
}

/// A real serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn bytes_to_read(&self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport::new(port)))
    }
}

/// Opens host serial devices with 8N1 framing and no flow control
#[derive(Debug, Clone)]
pub struct SerialOpener {
    /// Per-call read/write timeout of the port itself
    pub timeout: Duration,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
        }
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, device: &str, baud: BaudRate) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(device, baud.as_u32())
            .timeout(self.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport::new(port)))
    }

    fn available_devices(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

/// Whether an I/O error means "try again" rather than "give up"
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[test]
    fn test_serial_open_missing_device() {
        let opener = SerialOpener {
            timeout: Duration::from_millis(10),
        };
        assert!(opener
            .open("/dev/radiochat-does-not-exist", BaudRate::B9600)
            .is_err());
    }
}
