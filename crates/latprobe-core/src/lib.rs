//! Latprobe Core - Probe transport, clock sync, trigger listener and alignment
//!
//! This library talks to an external microcontroller timing probe over USB or a
//! TCP bridge, keeps a synchronized estimate of the probe's clock, receives the
//! probe's asynchronous trigger messages on a background thread, and aligns
//! locally captured event traces with probe-observed ones to estimate latency.

pub mod align;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod transport;

pub use clock::{local_micros, RemoteClockInfo};
pub use config::ProbeConfig;
pub use device::{DriftReport, ProbeDevice};
pub use error::ProbeError;
pub use listener::{ListenerState, TriggerHandler};
pub use protocol::TriggerMessage;
pub use transport::{ConnectionState, Transport, TransportKind};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Date this library was built (set by build.rs)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Firmware protocol version this library speaks
pub const PROTOCOL_VERSION: &str = "6";

/// Default blocking read timeout for both transports (ms)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Default drift limit above which a lag refresh is flagged (µs)
pub const DEFAULT_DRIFT_LIMIT_US: i32 = 1500;
