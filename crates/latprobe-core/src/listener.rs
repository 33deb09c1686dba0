//! Background trigger listener
//!
//! While the listener runs, a dedicated thread owns the transport and keeps
//! issuing bounded blocking reads. Every non-empty read is posted, in arrival
//! order, onto a bounded channel; the device owner drains that channel on its
//! own thread and hands each chunk to the registered [`TriggerHandler`].
//!
//! ## State machine
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |                      ^
//!               +--> Stopped           |  (transport fault)
//! ```
//!
//! Transitions are compare-and-swap on a shared atomic, so the thread and
//! the owner can never disagree about who holds the transport.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::ProbeError;
use crate::protocol::TriggerMessage;
use crate::transport::{Transport, TransportWriter};

/// Size of a single listener read
const READ_CHUNK: usize = 1024;

/// Lifecycle of the listener thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ListenerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ListenerState::Starting,
            2 => ListenerState::Running,
            3 => ListenerState::Stopping,
            _ => ListenerState::Stopped,
        }
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: ListenerState) -> bool {
        use ListenerState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Atomic holder for [`ListenerState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ListenerState::Stopped as u8))
    }

    pub(crate) fn get(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to` atomically.
    ///
    /// Fails with the state actually observed when it was not `from`.
    pub(crate) fn transition(
        &self,
        from: ListenerState,
        to: ListenerState,
    ) -> Result<(), ListenerState> {
        debug_assert!(from.can_transition(to), "illegal transition {from:?} -> {to:?}");
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ListenerState::from_u8)
    }
}

/// Receives the probe's asynchronous output
///
/// Invoked only on the thread that owns the device, never on the listener
/// thread.
pub trait TriggerHandler: Send {
    /// One parsed trigger line
    fn on_receive(&mut self, msg: TriggerMessage);

    /// One raw chunk as read from the transport.
    ///
    /// The default splits the chunk into lines, parses each as a trigger and
    /// drops lines that do not parse. Override it to consume non-trigger
    /// output such as the accelerometer dump.
    fn on_receive_raw(&mut self, raw: &str) {
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match TriggerMessage::parse_line(line) {
                Ok(msg) => self.on_receive(msg),
                Err(e) => tracing::warn!(line, error = %e, "Dropping malformed trigger line"),
            }
        }
    }
}

impl<F> TriggerHandler for F
where
    F: FnMut(TriggerMessage) + Send,
{
    fn on_receive(&mut self, msg: TriggerMessage) {
        self(msg)
    }
}

/// A running listener thread and the channels around it
pub(crate) struct ListenerThread {
    thread: JoinHandle<Option<Box<dyn Transport>>>,
    rx: Receiver<String>,
    writer: Box<dyn TransportWriter>,
    faulted: Arc<AtomicBool>,
}

impl ListenerThread {
    /// Hand `transport` to a new listener thread.
    ///
    /// `state` must already be `Starting`; it is `Running` on success. Reads
    /// lost to a full queue are added to `dropped`. On failure the transport
    /// is handed back with the error and the state returns to `Stopped`.
    pub(crate) fn spawn(
        transport: Box<dyn Transport>,
        state: Arc<StateCell>,
        dropped: Arc<AtomicU64>,
        read_timeout: Duration,
        queue_capacity: usize,
    ) -> Result<Self, (Box<dyn Transport>, ProbeError)> {
        let writer = match transport.writer() {
            Ok(writer) => writer,
            Err(e) => {
                let _ = state.transition(ListenerState::Starting, ListenerState::Stopped);
                return Err((transport, e));
            }
        };

        let (tx, rx) = crossbeam_channel::bounded::<String>(queue_capacity.max(1));
        // The transport only moves to the thread once it is running
        let (handoff_tx, handoff_rx) = crossbeam_channel::bounded::<Box<dyn Transport>>(1);
        let faulted = Arc::new(AtomicBool::new(false));
        let thread_state = Arc::clone(&state);
        let thread_faulted = Arc::clone(&faulted);

        let spawned = std::thread::Builder::new()
            .name("probe-listener".into())
            .spawn(move || {
                let mut transport = handoff_rx.recv().ok()?;
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    poll_loop(
                        transport.as_mut(),
                        &thread_state,
                        &thread_faulted,
                        &dropped,
                        &tx,
                        read_timeout,
                    );
                }));
                match result {
                    Ok(()) => {
                        tracing::debug!("Listener thread exited");
                        Some(transport)
                    }
                    Err(panic_info) => {
                        let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(panic = %msg, "Listener thread PANICKED");
                        thread_faulted.store(true, Ordering::Release);
                        None
                    }
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn probe listener thread");
                let _ = state.transition(ListenerState::Starting, ListenerState::Stopped);
                return Err((transport, ProbeError::TransportFault(e)));
            }
        };
        if let Err(returned) = handoff_tx.send(transport) {
            let _ = thread.join();
            let _ = state.transition(ListenerState::Starting, ListenerState::Stopped);
            return Err((
                returned.into_inner(),
                ProbeError::TransportFault(std::io::Error::other("listener thread exited early")),
            ));
        }

        let _ = state.transition(ListenerState::Starting, ListenerState::Running);
        tracing::info!(
            read_timeout_ms = read_timeout.as_millis() as u64,
            "Listener started"
        );
        Ok(Self {
            thread,
            rx,
            writer,
            faulted,
        })
    }

    /// True once the thread hit a transport fault or panicked
    pub(crate) fn faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Fire-and-forget write while the thread owns the transport
    pub(crate) fn send_byte(&mut self, c: u8) -> Result<(), ProbeError> {
        self.writer.send_byte(c)
    }

    /// Pop one queued chunk, waiting at most `timeout`
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub(crate) fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Join the thread and return the transport with everything still
    /// queued. `state` must already be `Stopping`.
    pub(crate) fn join(self) -> (Option<Box<dyn Transport>>, Vec<String>) {
        let transport = match self.thread.join() {
            Ok(transport) => transport,
            Err(_) => {
                tracing::error!("Listener thread could not be joined");
                None
            }
        };
        let leftover: Vec<String> = self.rx.try_iter().collect();
        (transport, leftover)
    }
}

/// Read until the state leaves `Starting`/`Running` or the transport faults.
///
/// Chunks are re-cut at the last newline so handlers see whole lines; a
/// partial line is held back until the next newline or a silent read.
fn poll_loop(
    transport: &mut dyn Transport,
    state: &StateCell,
    faulted: &AtomicBool,
    dropped: &AtomicU64,
    tx: &Sender<String>,
    read_timeout: Duration,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut pending = String::new();

    while matches!(state.get(), ListenerState::Starting | ListenerState::Running) {
        match transport.blocking_read(&mut buf, read_timeout) {
            Ok(0) => {
                if !pending.is_empty() {
                    post(tx, dropped, std::mem::take(&mut pending));
                }
            }
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                if let Some(idx) = pending.rfind('\n') {
                    let rest = pending.split_off(idx + 1);
                    post(tx, dropped, std::mem::replace(&mut pending, rest));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Listener read failed, stopping");
                faulted.store(true, Ordering::Release);
                let _ = state.transition(ListenerState::Running, ListenerState::Stopping);
                break;
            }
        }
    }

    if !pending.is_empty() {
        post(tx, dropped, pending);
    }
}

fn post(tx: &Sender<String>, dropped: &AtomicU64, raw: String) {
    tracing::trace!(bytes = raw.len(), "listener_read");
    match tx.try_send(raw) {
        Ok(()) => {}
        Err(TrySendError::Full(raw)) => {
            let total = dropped.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(bytes = raw.len(), total, "Listener queue full, dropping read");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
