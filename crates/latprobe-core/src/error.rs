//! Error types shared by the transport, protocol, clock and listener layers

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the probe
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Not connected to probe")]
    NotConnected,

    #[error("Listener conflict: {0}")]
    ListenerConflict(&'static str),

    #[error("Timed out reading from probe after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response from probe: expected ack {expected:?}, got {actual:?}")]
    AckMismatch {
        expected: char,
        actual: Option<char>,
    },

    #[error("Protocol version mismatch: probe reports {actual:?}, expected {expected:?}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Malformed message: {0:?}")]
    MalformedMessage(String),

    #[error("Clock has not been synchronized")]
    NotSynced,

    #[error("Probe not found: {0}")]
    DeviceNotFound(String),

    #[error("Transport fault: {0}")]
    TransportFault(#[from] std::io::Error),
}

impl ProbeError {
    /// True for errors caused by the probe answering something unexpected
    /// (wrong ack character or wrong firmware version).
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            ProbeError::AckMismatch { .. } | ProbeError::VersionMismatch { .. }
        )
    }
}

impl From<serialport::Error> for ProbeError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProbeError::DeviceNotFound(e.description),
            _ => ProbeError::TransportFault(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_mismatch_class() {
        let ack = ProbeError::AckMismatch {
            expected: 'v',
            actual: Some('x'),
        };
        let version = ProbeError::VersionMismatch {
            expected: "6".into(),
            actual: "5".into(),
        };
        assert!(ack.is_protocol_mismatch());
        assert!(version.is_protocol_mismatch());
        assert!(!ProbeError::NotConnected.is_protocol_mismatch());
    }

    #[test]
    fn test_ack_mismatch_message_names_both_chars() {
        let err = ProbeError::AckMismatch {
            expected: 'a',
            actual: Some('b'),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"), "{msg}");
        assert!(msg.contains("'b'"), "{msg}");
    }

    #[test]
    fn test_io_error_becomes_transport_fault() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: ProbeError = io.into();
        assert!(matches!(err, ProbeError::TransportFault(_)));
    }
}
