//! Byte channel to the probe
//!
//! Provides one capability interface with interchangeable backends:
//! - `usb`: the probe's CDC serial interface, found by USB vendor id
//! - `tcp`: a loopback TCP bridge relaying to a probe attached elsewhere
//! - `sim`: an in-process probe emulation used by tests and demos
//!
//! The backend is chosen once at connect time. With the `Auto` preference a
//! short-timeout connect attempt to the bridge address decides between the
//! bridge and direct USB.

pub mod sim;
pub mod tcp;
pub mod usb;

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{ProbeConfig, TransportPreference};
use crate::error::ProbeError;

/// Timeout used when discarding stale input
const FLUSH_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Upper bound on reads performed by one flush
const FLUSH_MAX_READS: usize = 64;

/// Connection state owned by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No open channel; every operation fails with `NotConnected`
    Disconnected,
    /// Channel is being opened
    Connecting,
    /// Channel is open and usable
    Connected,
}

/// Which backend a transport uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Usb,
    Bridge,
    Simulated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => write!(f, "usb"),
            TransportKind::Bridge => write!(f, "bridge"),
            TransportKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// A byte channel to the probe
///
/// Implementations never block longer than the timeout handed to
/// [`Transport::blocking_read`], and never swallow a disconnect: any I/O
/// fault moves the transport to [`ConnectionState::Disconnected`] and later
/// calls fail with [`ProbeError::NotConnected`].
pub trait Transport: Send {
    /// Backend identifier
    fn kind(&self) -> TransportKind;

    /// Open the channel
    fn connect(&mut self) -> Result<(), ProbeError>;

    /// Close the channel; closing a closed transport is a no-op
    fn disconnect(&mut self);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Write raw bytes
    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError>;

    /// Write a single command byte
    fn send_byte(&mut self, c: u8) -> Result<(), ProbeError> {
        self.send(&[c])
    }

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived within the timeout.
    fn blocking_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError>;

    /// Discard any input already queued on the channel.
    fn flush_input(&mut self) -> Result<(), ProbeError> {
        let mut buf = [0u8; 256];
        for _ in 0..FLUSH_MAX_READS {
            if self.blocking_read(&mut buf, FLUSH_READ_TIMEOUT)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Independent write handle, usable while another thread owns the
    /// transport and reads from it.
    fn writer(&self) -> Result<Box<dyn TransportWriter>, ProbeError>;
}

/// Write half of a transport
pub trait TransportWriter: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError>;

    fn send_byte(&mut self, c: u8) -> Result<(), ProbeError> {
        self.send(&[c])
    }
}

/// Read one newline-terminated reply, waiting at most `timeout` in total.
///
/// Returns `None` if nothing arrived. Text after the first newline of the
/// final chunk is discarded; callers use this for strict request/reply
/// exchanges where the probe sends exactly one line.
pub fn read_line(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Option<String>, ProbeError> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut buf = [0u8; 128];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let slice = remaining.min(Duration::from_millis(crate::DEFAULT_READ_TIMEOUT_MS));
        let n = transport.blocking_read(&mut buf, slice)?;
        if let Some(end) = buf[..n].iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&buf[..end]);
            return Ok(Some(String::from_utf8_lossy(&line).trim().to_string()));
        }
        line.extend_from_slice(&buf[..n]);
    }
    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }
}

/// Build the transport selected by `config`.
///
/// The returned transport is not yet connected.
pub fn open(config: &ProbeConfig) -> Result<Box<dyn Transport>, ProbeError> {
    match config.transport {
        TransportPreference::Usb => Ok(Box::new(usb::UsbTransport::from_config(config))),
        TransportPreference::Bridge => Ok(Box::new(tcp::TcpTransport::from_config(config)?)),
        TransportPreference::Auto => {
            let bridge = tcp::TcpTransport::from_config(config)?;
            if tcp::probe(bridge.addr(), config.bridge_probe_timeout()) {
                tracing::info!(addr = %bridge.addr(), "Using TCP bridge");
                Ok(Box::new(bridge))
            } else {
                tracing::info!("No TCP bridge detected, using direct USB connection");
                Ok(Box::new(usb::UsbTransport::from_config(config)))
            }
        }
    }
}
