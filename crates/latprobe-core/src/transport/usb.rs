//! Direct USB backend
//!
//! The probe enumerates as a USB CDC serial device. Discovery filters the
//! system's serial ports by the probe's vendor id and skips the bootloader's
//! product id, so a probe waiting to be flashed is never opened.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};

use super::{ConnectionState, Transport, TransportKind, TransportWriter};
use crate::config::ProbeConfig;
use crate::error::ProbeError;

/// Nominal line rate; CDC ignores it but the port API requires one
const BAUD_RATE: u32 = 115_200;

/// A candidate probe found on the USB bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Serial port path (e.g. `/dev/ttyACM0`)
    pub path: String,
    pub vid: u16,
    pub pid: u16,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// List serial ports that look like a probe.
///
/// # Arguments
/// * `vendor_id` - USB vendor id of the probe
/// * `bootloader_pid` - Product id to skip (bootloader mode)
pub fn list_probes(vendor_id: u16, bootloader_pid: u16) -> Result<Vec<ProbeInfo>, ProbeError> {
    let ports = serialport::available_ports()?;
    let probes = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == vendor_id && usb.pid != bootloader_pid => {
                Some(ProbeInfo {
                    path: port.port_name,
                    vid: usb.vid,
                    pid: usb.pid,
                    product: usb.product,
                    serial_number: usb.serial_number,
                })
            }
            _ => None,
        })
        .collect();
    Ok(probes)
}

/// Probe connection over its USB serial interface
pub struct UsbTransport {
    path: Option<String>,
    vendor_id: u16,
    bootloader_pid: u16,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    port_timeout: Duration,
    state: ConnectionState,
}

impl UsbTransport {
    /// Create a transport for an explicit port path, or for the first
    /// discovered probe when `path` is `None`.
    pub fn new(path: Option<String>, vendor_id: u16, bootloader_pid: u16) -> Self {
        Self {
            path,
            vendor_id,
            bootloader_pid,
            read_timeout: Duration::from_millis(crate::DEFAULT_READ_TIMEOUT_MS),
            port: None,
            port_timeout: Duration::ZERO,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let mut transport = Self::new(
            config.serial_path.clone(),
            config.usb_vendor_id,
            config.usb_bootloader_pid,
        );
        transport.read_timeout = config.read_timeout();
        transport
    }

    fn resolve_path(&self) -> Result<String, ProbeError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        list_probes(self.vendor_id, self.bootloader_pid)?
            .into_iter()
            .next()
            .map(|p| p.path)
            .ok_or_else(|| {
                ProbeError::DeviceNotFound(format!(
                    "no USB serial device with vendor id {:04x}",
                    self.vendor_id
                ))
            })
    }

    /// Drop the port and report the fault
    fn fault(&mut self, e: std::io::Error) -> ProbeError {
        tracing::error!(error = %e, "USB transport fault, disconnecting");
        self.port = None;
        self.state = ConnectionState::Disconnected;
        ProbeError::TransportFault(e)
    }
}

impl Transport for UsbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn connect(&mut self) -> Result<(), ProbeError> {
        if self.port.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        let opened = self.resolve_path().and_then(|path| {
            tracing::info!(path = %path, "Opening probe serial port");
            let mut port = serialport::new(path.as_str(), BAUD_RATE)
                .timeout(self.read_timeout)
                .open()?;
            // Teensy CDC only transmits once DTR is asserted
            port.write_data_terminal_ready(true)?;
            Ok(port)
        });

        match opened {
            Ok(port) => {
                self.port = Some(port);
                self.port_timeout = self.read_timeout;
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("USB transport closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        let port = self.port.as_mut().ok_or(ProbeError::NotConnected)?;
        let result = port.write_all(data).and_then(|_| port.flush());
        match result {
            Ok(()) => {
                tracing::trace!(bytes = data.len(), "usb_send");
                Ok(())
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    fn blocking_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError> {
        let port = self.port.as_mut().ok_or(ProbeError::NotConnected)?;
        if timeout != self.port_timeout {
            port.set_timeout(timeout)?;
            self.port_timeout = timeout;
        }
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(self.fault(e)),
        }
    }

    fn writer(&self) -> Result<Box<dyn TransportWriter>, ProbeError> {
        let port = self.port.as_ref().ok_or(ProbeError::NotConnected)?;
        Ok(Box::new(UsbWriter {
            port: port.try_clone()?,
        }))
    }
}

/// Cloned port handle used for writes while the listener reads
struct UsbWriter {
    port: Box<dyn SerialPort>,
}

impl TransportWriter for UsbWriter {
    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_transport_is_disconnected() {
        let mut transport = UsbTransport::new(None, 0x16c0, 0x0478);
        assert_eq!(transport.kind(), TransportKind::Usb);
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(matches!(
            transport.send_byte(b'V'),
            Err(ProbeError::NotConnected)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.blocking_read(&mut buf, Duration::from_millis(1)),
            Err(ProbeError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_to_missing_path_fails_and_stays_disconnected() {
        let mut transport =
            UsbTransport::new(Some("/dev/latprobe-does-not-exist".into()), 0x16c0, 0x0478);
        assert!(transport.connect().is_err());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut transport = UsbTransport::new(None, 0x16c0, 0x0478);
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }
}
