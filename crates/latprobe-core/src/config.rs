//! Probe session configuration
//!
//! Stored as JSON. Every field has a default so partial files load, and a
//! missing or unreadable file falls back to the defaults entirely.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::align::{BestShiftSearch, ShiftGrid};

fn default_usb_vendor_id() -> u16 {
    0x16c0
}

fn default_usb_bootloader_pid() -> u16 {
    0x0478
}

fn default_bridge_address() -> String {
    crate::transport::tcp::DEFAULT_BRIDGE_ADDR.to_string()
}

fn default_bridge_probe_timeout_ms() -> u64 {
    200
}

fn default_read_timeout_ms() -> u64 {
    crate::DEFAULT_READ_TIMEOUT_MS
}

fn default_protocol_version() -> String {
    crate::PROTOCOL_VERSION.to_string()
}

fn default_drift_limit_us() -> i32 {
    crate::DEFAULT_DRIFT_LIMIT_US
}

fn default_listener_queue_capacity() -> usize {
    256
}

/// Which transport to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Use the TCP bridge if one answers, otherwise USB
    #[default]
    Auto,
    Usb,
    Bridge,
}

/// Probe session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub transport: TransportPreference,
    /// Explicit serial port (None = discover by vendor id)
    #[serde(default)]
    pub serial_path: Option<String>,
    /// USB vendor id of the probe
    #[serde(default = "default_usb_vendor_id")]
    pub usb_vendor_id: u16,
    /// Product id the probe reports while in its bootloader
    #[serde(default = "default_usb_bootloader_pid")]
    pub usb_bootloader_pid: u16,
    /// TCP bridge `host:port`
    #[serde(default = "default_bridge_address")]
    pub bridge_address: String,
    /// Connect timeout for the bridge reachability probe (ms)
    #[serde(default = "default_bridge_probe_timeout_ms")]
    pub bridge_probe_timeout_ms: u64,
    /// Blocking read timeout (ms)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Firmware version the probe must report
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Mean lag above which drift is flagged (µs)
    #[serde(default = "default_drift_limit_us")]
    pub drift_limit_us: i32,
    /// Raw reads buffered between the listener thread and its owner
    #[serde(default = "default_listener_queue_capacity")]
    pub listener_queue_capacity: usize,
    #[serde(default)]
    pub shift_grid: ShiftGrid,
    #[serde(default)]
    pub best_shift: BestShiftSearch,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            transport: TransportPreference::default(),
            serial_path: None,
            usb_vendor_id: default_usb_vendor_id(),
            usb_bootloader_pid: default_usb_bootloader_pid(),
            bridge_address: default_bridge_address(),
            bridge_probe_timeout_ms: default_bridge_probe_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            protocol_version: default_protocol_version(),
            drift_limit_us: default_drift_limit_us(),
            listener_queue_capacity: default_listener_queue_capacity(),
            shift_grid: ShiftGrid::default(),
            best_shift: BestShiftSearch::default(),
        }
    }
}

impl ProbeConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn bridge_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_probe_timeout_ms)
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
