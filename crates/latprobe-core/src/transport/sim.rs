//! In-process probe emulation
//!
//! `SimTransport` behaves like a probe on the other end of a byte channel:
//! it keeps its own microsecond clock, answers commands with the flip-case
//! ack convention, records sync timestamps for the clock-sync exchange and
//! lets a test inject trigger lines or unplug the device through a
//! [`SimHandle`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{ConnectionState, Transport, TransportKind, TransportWriter};
use crate::error::ProbeError;
use crate::protocol::{self, TriggerMessage};

/// Emulated probe state shared between the transport and its handle
struct SimState {
    /// Probe clock zero
    zero: Instant,
    /// Bytes waiting to be read by the host
    outbox: VecDeque<u8>,
    /// Sync timestamps, one per digit 1..=9
    sync_times: [i64; 9],
    readout_index: usize,
    /// Every byte the probe received, in order
    received: Vec<u8>,
    version: String,
    last_shock: i64,
    last_laser: TriggerMessage,
    plugged: bool,
}

impl SimState {
    fn now_us(&self) -> i64 {
        self.zero.elapsed().as_micros() as i64
    }

    fn push_line(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.push_back(b'\n');
    }

    fn handle_byte(&mut self, c: u8) {
        self.received.push(c);
        match c {
            b'1'..=b'9' => {
                let idx = usize::from(c - b'1');
                self.sync_times[idx] = self.now_us();
                self.readout_index = 0;
            }
            protocol::CMD_SYNC_ZERO => {
                self.zero = Instant::now();
                self.push_line("z");
            }
            protocol::CMD_SYNC_SEND => {
                for idx in 0..9 {
                    self.sync_times[idx] = self.now_us();
                    self.push_line(&(idx + 1).to_string());
                }
                self.readout_index = 0;
            }
            protocol::CMD_SYNC_READOUT => {
                let idx = self.readout_index;
                let line = format!("{} {}", idx + 1, self.sync_times[idx]);
                self.push_line(&line);
                self.readout_index = (idx + 1) % 9;
            }
            protocol::CMD_RESET => {
                self.outbox.clear();
                self.readout_index = 0;
            }
            protocol::CMD_VERSION => {
                let line = format!("v{}", self.version);
                self.push_line(&line);
            }
            protocol::CMD_GSHOCK => {
                let line = format!("g {}", self.last_shock);
                self.push_line(&line);
            }
            protocol::CMD_TIME_NOW => {
                let line = format!("t {}", self.now_us());
                self.push_line(&line);
            }
            protocol::CMD_SEND_LAST_LASER => {
                let line = self.last_laser.to_string();
                self.push_line(&line);
            }
            c if c.is_ascii_alphabetic() => {
                let ack = protocol::flip_case(char::from(c));
                self.push_line(&ack.to_string());
            }
            // Whitespace and anything else is ignored, as the firmware does
            _ => {}
        }
    }
}

type Shared = Arc<(Mutex<SimState>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, SimState> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feed bytes to the emulated probe; false if it has been unplugged
fn deliver(shared: &Shared, data: &[u8]) -> bool {
    let plugged = {
        let mut sim = lock(shared);
        if sim.plugged {
            for &c in data {
                sim.handle_byte(c);
            }
        }
        sim.plugged
    };
    shared.1.notify_all();
    plugged
}

fn unplugged_error() -> ProbeError {
    ProbeError::TransportFault(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "simulated probe unplugged",
    ))
}

/// Transport backed by an emulated probe
pub struct SimTransport {
    shared: Shared,
    state: ConnectionState,
}

/// Test-side control over a [`SimTransport`]
#[derive(Clone)]
pub struct SimHandle {
    shared: Shared,
}

impl SimTransport {
    /// Create an emulated probe reporting protocol `version`.
    pub fn new(version: &str) -> (Self, SimHandle) {
        let state = SimState {
            zero: Instant::now(),
            outbox: VecDeque::new(),
            sync_times: [0; 9],
            readout_index: 0,
            received: Vec::new(),
            version: version.to_string(),
            last_shock: 0,
            last_laser: TriggerMessage {
                tag: 'L',
                t: 0,
                value: 0,
                count: 0,
            },
            plugged: true,
        };
        let shared: Shared = Arc::new((Mutex::new(state), Condvar::new()));
        (
            Self {
                shared: Arc::clone(&shared),
                state: ConnectionState::Disconnected,
            },
            SimHandle { shared },
        )
    }

    fn unplugged(&mut self) -> ProbeError {
        tracing::error!("Simulated probe unplugged, disconnecting");
        self.state = ConnectionState::Disconnected;
        unplugged_error()
    }
}

impl Transport for SimTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    fn connect(&mut self) -> Result<(), ProbeError> {
        if !lock(&self.shared).plugged {
            return Err(ProbeError::DeviceNotFound("simulated probe unplugged".into()));
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        if self.state != ConnectionState::Connected {
            return Err(ProbeError::NotConnected);
        }
        if !deliver(&self.shared, data) {
            return Err(self.unplugged());
        }
        Ok(())
    }

    fn blocking_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ProbeError> {
        if self.state != ConnectionState::Connected {
            return Err(ProbeError::NotConnected);
        }
        let (n, plugged) = {
            let guard = lock(&self.shared);
            let (mut sim, _) = self
                .shared
                .1
                .wait_timeout_while(guard, timeout, |s| s.plugged && s.outbox.is_empty())
                .unwrap_or_else(PoisonError::into_inner);
            let n = buf.len().min(sim.outbox.len());
            for (slot, byte) in buf.iter_mut().zip(sim.outbox.drain(..n)) {
                *slot = byte;
            }
            (n, sim.plugged)
        };
        if !plugged {
            return Err(self.unplugged());
        }
        Ok(n)
    }

    fn writer(&self) -> Result<Box<dyn TransportWriter>, ProbeError> {
        if self.state != ConnectionState::Connected {
            return Err(ProbeError::NotConnected);
        }
        Ok(Box::new(SimWriter {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct SimWriter {
    shared: Shared,
}

impl TransportWriter for SimWriter {
    fn send(&mut self, data: &[u8]) -> Result<(), ProbeError> {
        if deliver(&self.shared, data) {
            Ok(())
        } else {
            Err(unplugged_error())
        }
    }
}

impl SimHandle {
    /// Queue an asynchronous trigger line, as the probe does on an event.
    pub fn emit_trigger(&self, msg: &TriggerMessage) {
        self.emit_raw(&format!("{}\n", msg));
    }

    /// Queue arbitrary text for the host.
    pub fn emit_raw(&self, text: &str) {
        lock(&self.shared).outbox.extend(text.as_bytes());
        self.shared.1.notify_all();
    }

    /// Simulate the probe being pulled from the bus.
    pub fn unplug(&self) {
        lock(&self.shared).plugged = false;
        self.shared.1.notify_all();
    }

    /// Every byte the probe has received so far.
    pub fn received(&self) -> Vec<u8> {
        lock(&self.shared).received.clone()
    }

    /// Current reading of the probe clock (µs since its last zero).
    pub fn probe_micros(&self) -> i64 {
        lock(&self.shared).now_us()
    }

    pub fn set_last_shock(&self, t: i64) {
        lock(&self.shared).last_shock = t;
    }

    pub fn set_last_laser(&self, msg: TriggerMessage) {
        lock(&self.shared).last_laser = msg;
    }

    /// Bytes queued for the host but not yet read.
    pub fn pending_output(&self) -> usize {
        lock(&self.shared).outbox.len()
    }
}
