//! Latprobe - latency measurement against an external USB timing probe
//!
//! This library re-exports the probe transport, clock synchronization,
//! trigger listener and alignment algorithms from `latprobe-core`.

use std::path::PathBuf;

pub use latprobe_core::{align, clock, config, device, error, listener, protocol, transport};

pub use latprobe_core::{
    local_micros, ConnectionState, DriftReport, ListenerState, ProbeConfig, ProbeDevice,
    ProbeError, RemoteClockInfo, Transport, TransportKind, TriggerHandler, TriggerMessage,
};
pub use latprobe_core::{
    BUILD_DATE, DEFAULT_DRIFT_LIMIT_US, DEFAULT_READ_TIMEOUT_MS, PROTOCOL_VERSION, VERSION,
};

/// Config file path: `<config_dir>/latprobe/config.json`
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("latprobe")
        .join("config.json")
}
