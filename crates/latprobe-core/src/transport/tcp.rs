//! TCP bridge backend
//!
//! Used when direct USB access to the probe is unavailable. A relay process
//! on the loopback interface owns the probe and forwards bytes both ways; it
//! also answers `"bridge sync"` / `"bridge update"` with its own clock
//! estimate (see `clock::sync`).

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{ConnectionState, Transport, TransportKind, TransportWriter};
use crate::config::ProbeConfig;
use crate::error::ProbeError;

/// Default bridge address
pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:50007";

/// Check whether a bridge is listening at `addr`.
///
/// A short-timeout connect attempt; the probe connection is closed again
/// immediately.
pub fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            let _ = stream.shutdown(Shutdown::Both);
            true
        }
        Err(e) => {
            tracing::debug!(addr = %addr, error = %e, "TCP bridge probe failed");
            false
        }
    }
}

/// Probe connection through the TCP bridge
pub struct TcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    stream_timeout: Option<Duration>,
    state: ConnectionState,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            stream: None,
            stream_timeout: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Resolve the configured bridge address.
    pub fn from_config(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let addr = config
            .bridge_address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ProbeError::DeviceNotFound(format!(
                    "bridge address {} did not resolve",
                    config.bridge_address
                ))
            })?;
        Ok(Self::new(addr, config.bridge_probe_timeout()))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn fault(&mut self, e: std::io::Error) -> ProbeError {
        tracing::error!(addr = %self.addr, error = %e, "TCP bridge fault, disconnecting");
        self.stream = None;
        self.stream_timeout = None;
        self.state = ConnectionState::Disconnected;
        ProbeError::TransportFault(e)
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    fn connect(&mut self) -> Result<(), ProbeError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        tracing::info!(addr = %self.addr, "Connecting to TCP bridge");

        let opened = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .and_then(|stream| stream.set_nodelay(true).map(|_| stream));
        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(ProbeError::TransportFault(e))
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!(addr = %self.addr, "TCP bridge closed");
        }
        self.stream_timeout = None;
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        let stream = self.stream.as_mut().ok_or(ProbeError::NotConnected)?;
        match stream.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fault(e)),
        }
    }

    fn blocking_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError> {
        let stream = self.stream.as_mut().ok_or(ProbeError::NotConnected)?;
        // A zero read timeout means "block forever" for sockets
        let timeout = timeout.max(Duration::from_millis(1));
        if self.stream_timeout != Some(timeout) {
            stream.set_read_timeout(Some(timeout))?;
            self.stream_timeout = Some(timeout);
        }
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(self.fault(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "bridge closed the connection",
            ))),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(self.fault(e)),
        }
    }

    fn writer(&self) -> Result<Box<dyn TransportWriter>, ProbeError> {
        let stream = self.stream.as_ref().ok_or(ProbeError::NotConnected)?;
        Ok(Box::new(TcpWriter {
            stream: stream.try_clone()?,
        }))
    }
}

/// Cloned socket used for writes while the listener reads
struct TcpWriter {
    stream: TcpStream,
}

impl TransportWriter for TcpWriter {
    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        self.stream.write_all(data)?;
        Ok(())
    }
}
