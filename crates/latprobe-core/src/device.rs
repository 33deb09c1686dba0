//! Probe device facade
//!
//! `ProbeDevice` is the public surface UI-layer code talks to. It owns the
//! transport while no listener runs, hands it to the listener thread for the
//! duration of a listen, and keeps the latest [`RemoteClockInfo`] snapshot.
//!
//! Blocking exchanges (acknowledged commands, clock sync, drift checks,
//! direct reads) need the transport to themselves and fail with
//! [`ProbeError::ListenerConflict`] while the listener is active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{sync, RemoteClockInfo};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::listener::{ListenerState, ListenerThread, StateCell, TriggerHandler};
use crate::protocol::{self, TriggerMessage};
use crate::transport::{self, read_line, Transport, TransportKind};

/// Result of a lag refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftReport {
    pub min_lag: i32,
    pub max_lag: i32,
    pub mean_lag: i32,
    /// `|mean_lag|` exceeded the configured limit
    pub high_drift: bool,
}

impl DriftReport {
    pub fn new(clock: &RemoteClockInfo, limit_us: i32) -> Self {
        let mean_lag = clock.mean_lag();
        Self {
            min_lag: clock.min_lag,
            max_lag: clock.max_lag,
            mean_lag,
            high_drift: i64::from(mean_lag).abs() > i64::from(limit_us),
        }
    }
}

/// Connection to one timing probe
pub struct ProbeDevice {
    config: ProbeConfig,
    /// Owned here while the listener is stopped
    transport: Option<Box<dyn Transport>>,
    kind: Option<TransportKind>,
    clock: Option<RemoteClockInfo>,
    listener_state: Arc<StateCell>,
    listener: Option<ListenerThread>,
    /// Reads lost to a full listener queue since the last start
    dropped_reads: Arc<AtomicU64>,
    handler: Option<Box<dyn TriggerHandler>>,
}

impl ProbeDevice {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            transport: None,
            kind: None,
            clock: None,
            listener_state: Arc::new(StateCell::new()),
            listener: None,
            dropped_reads: Arc::new(AtomicU64::new(0)),
            handler: None,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Open the configured transport and run the connect sequence.
    ///
    /// Connecting an already connected device is a no-op.
    pub fn connect(&mut self) -> Result<(), ProbeError> {
        if self.is_connected() {
            return Ok(());
        }
        let transport = transport::open(&self.config)?;
        self.connect_with(transport)
    }

    /// Run the connect sequence over a caller-supplied transport.
    ///
    /// Soft reset, version check, then a full clock sync. A failed reset or
    /// version check disconnects again; a failed sync leaves the device
    /// connected but unsynced so the caller can retry [`Self::sync_clock`].
    pub fn connect_with(&mut self, mut transport: Box<dyn Transport>) -> Result<(), ProbeError> {
        self.disconnect();
        if !transport.is_connected() {
            transport.connect()?;
        }
        let kind = transport.kind();
        tracing::info!(transport = %kind, "Probe transport connected");
        self.kind = Some(kind);
        self.transport = Some(transport);

        if let Err(e) = self.soft_reset().and_then(|_| self.check_version()) {
            tracing::error!(error = %e, "Probe handshake failed, disconnecting");
            self.disconnect();
            return Err(e);
        }

        self.sync_clock()?;
        Ok(())
    }

    /// Stop the listener if needed and close the transport.
    pub fn disconnect(&mut self) {
        self.stop_listener();
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
            tracing::info!("Probe disconnected");
        }
        self.kind = None;
        self.clock = None;
    }

    pub fn is_connected(&self) -> bool {
        match &self.listener {
            Some(listener) => !listener.faulted(),
            None => self
                .transport
                .as_ref()
                .is_some_and(|transport| transport.is_connected()),
        }
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.kind
    }

    /// Latest clock snapshot, `None` until a sync succeeded
    pub fn clock(&self) -> Option<RemoteClockInfo> {
        self.clock
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener_state.get()
    }

    /// Listener reads dropped because the queue was full.
    ///
    /// Counts since the last [`Self::start_listener`] and stays readable
    /// after the listener stops. Non-zero means the handler saw only part
    /// of the probe's output.
    pub fn dropped_reads(&self) -> u64 {
        self.dropped_reads.load(Ordering::Acquire)
    }

    /// Exclusive access to the transport for a blocking exchange
    fn exclusive(&mut self, op: &'static str) -> Result<&mut dyn Transport, ProbeError> {
        if self.listener.is_some() || self.listener_state.get() != ListenerState::Stopped {
            return Err(ProbeError::ListenerConflict(op));
        }
        match self.transport.as_mut() {
            Some(transport) if transport.is_connected() => Ok(transport.as_mut()),
            _ => Err(ProbeError::NotConnected),
        }
    }

    /// Full clock sync; replaces the stored snapshot on success.
    pub fn sync_clock(&mut self) -> Result<RemoteClockInfo, ProbeError> {
        let timeout = self.config.read_timeout();
        let transport = self.exclusive("sync clock while listening")?;
        let clock = sync::sync_clock(transport, timeout)?;
        tracing::debug!(clock = %clock, "Stored clock snapshot");
        self.clock = Some(clock);
        Ok(clock)
    }

    /// One `'Z'` exchange; cheaper but far less accurate than
    /// [`Self::sync_clock`].
    pub fn simple_sync_clock(&mut self) -> Result<RemoteClockInfo, ProbeError> {
        let timeout = self.config.read_timeout();
        let transport = self.exclusive("sync clock while listening")?;
        let clock = sync::simple_sync(transport, timeout)?;
        tracing::info!(clock = %clock, "Clock synchronized (single exchange)");
        self.clock = Some(clock);
        Ok(clock)
    }

    /// Refresh the lag bounds of the current clock and report drift.
    ///
    /// High drift is logged as a warning and reported, never an error.
    pub fn check_drift(&mut self) -> Result<DriftReport, ProbeError> {
        let current = self.clock;
        let timeout = self.config.read_timeout();
        let limit = self.config.drift_limit_us;
        let transport = self.exclusive("check drift while listening")?;
        let current = current.ok_or(ProbeError::NotSynced)?;

        let clock = sync::update_bounds(transport, &current, timeout)?;
        self.clock = Some(clock);

        let report = DriftReport::new(&clock, limit);
        if report.high_drift {
            tracing::warn!(
                mean_lag = report.mean_lag,
                min_lag = report.min_lag,
                max_lag = report.max_lag,
                limit_us = limit,
                "High clock drift detected"
            );
        } else {
            tracing::info!(
                mean_lag = report.mean_lag,
                min_lag = report.min_lag,
                max_lag = report.max_lag,
                "Clock drift within limit"
            );
        }
        Ok(report)
    }

    /// Send a single-byte command.
    ///
    /// With the listener stopped this waits for the reply, checks the
    /// flip-case ack and returns the trimmed payload. While listening the
    /// byte is only written and the payload is empty; any reply reaches the
    /// trigger handler instead. Once the listener has seen the probe go away
    /// this fails with `NotConnected`.
    pub fn command(&mut self, cmd: u8) -> Result<String, ProbeError> {
        if self.listener.is_none() {
            return self.exchange(cmd);
        }
        if self.listener.as_ref().is_some_and(|l| l.faulted()) {
            tracing::warn!(cmd = %char::from(cmd), "Listener faulted, command not sent");
            self.stop_listener();
            return Err(ProbeError::NotConnected);
        }
        let sent = match self.listener.as_mut() {
            Some(listener) => listener.send_byte(cmd),
            None => Err(ProbeError::NotConnected),
        };
        if let Err(e) = sent {
            tracing::error!(cmd = %char::from(cmd), error = %e, "Write failed while listening");
            return Err(ProbeError::NotConnected);
        }
        tracing::debug!(cmd = %char::from(cmd), "Command sent while listening");
        Ok(String::new())
    }

    fn exchange(&mut self, cmd: u8) -> Result<String, ProbeError> {
        let timeout = self.config.read_timeout();
        let transport = self.exclusive("blocking command while listening")?;
        transport.send_byte(cmd)?;
        let reply = read_line(transport, timeout)?.ok_or(ProbeError::Timeout(timeout))?;
        tracing::debug!(cmd = %char::from(cmd), reply = %reply, "command");
        protocol::parse_ack(protocol::flip_case(char::from(cmd)), &reply)
    }

    /// Read one line from the probe, failing with `Timeout` on silence.
    pub fn read_one(&mut self) -> Result<String, ProbeError> {
        let timeout = self.config.read_timeout();
        let transport = self.exclusive("read while listening")?;
        read_line(transport, timeout)?.ok_or(ProbeError::Timeout(timeout))
    }

    /// Ask the probe to reset its state and discard anything it already
    /// sent.
    pub fn soft_reset(&mut self) -> Result<(), ProbeError> {
        let transport = self.exclusive("reset while listening")?;
        transport.send_byte(protocol::CMD_RESET)?;
        transport.flush_input()?;
        tracing::debug!("Probe soft reset");
        Ok(())
    }

    /// Check that the probe speaks the expected protocol version.
    pub fn check_version(&mut self) -> Result<String, ProbeError> {
        let version = self.exchange(protocol::CMD_VERSION)?;
        if version != self.config.protocol_version {
            tracing::error!(
                expected = %self.config.protocol_version,
                actual = %version,
                "Probe firmware version mismatch"
            );
            return Err(ProbeError::VersionMismatch {
                expected: self.config.protocol_version.clone(),
                actual: version,
            });
        }
        tracing::info!(version = %version, "Probe protocol version OK");
        Ok(version)
    }

    /// Round-trip time of a `'P'` exchange
    pub fn ping(&mut self) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        self.exchange(protocol::CMD_PING)?;
        let rtt = started.elapsed();
        tracing::debug!(rtt_us = rtt.as_micros() as u64, "ping");
        Ok(rtt)
    }

    /// Probe time of the last accelerometer shock (µs, probe clock)
    pub fn read_last_shock_time(&mut self) -> Result<i64, ProbeError> {
        let payload = self.exchange(protocol::CMD_GSHOCK)?;
        payload
            .parse::<i64>()
            .map_err(|_| ProbeError::MalformedMessage(payload))
    }

    /// Send a command whose reply is a trigger line (e.g. `'J'`, `'E'`).
    pub fn read_trigger_message(&mut self, cmd: u8) -> Result<TriggerMessage, ProbeError> {
        let timeout = self.config.read_timeout();
        let transport = self.exclusive("blocking command while listening")?;
        transport.send_byte(cmd)?;
        let reply = read_line(transport, timeout)?.ok_or(ProbeError::Timeout(timeout))?;
        match reply.chars().next() {
            Some(protocol::TRIGGER_PREFIX) => TriggerMessage::parse_line(&reply),
            actual => Err(ProbeError::AckMismatch {
                expected: protocol::TRIGGER_PREFIX,
                actual,
            }),
        }
    }

    /// Hand the transport to a background listener thread.
    pub fn start_listener(&mut self) -> Result<(), ProbeError> {
        if self.listener.is_none() && !self.is_connected() {
            return Err(ProbeError::ListenerConflict(
                "start listener while not connected",
            ));
        }
        self.listener_state
            .transition(ListenerState::Stopped, ListenerState::Starting)
            .map_err(|_| ProbeError::ListenerConflict("listener already active"))?;

        let Some(transport) = self.transport.take() else {
            let _ = self
                .listener_state
                .transition(ListenerState::Starting, ListenerState::Stopped);
            return Err(ProbeError::NotConnected);
        };

        self.dropped_reads.store(0, Ordering::Release);
        match ListenerThread::spawn(
            transport,
            Arc::clone(&self.listener_state),
            Arc::clone(&self.dropped_reads),
            self.config.read_timeout(),
            self.config.listener_queue_capacity,
        ) {
            Ok(listener) => {
                self.listener = Some(listener);
                Ok(())
            }
            Err((transport, e)) => {
                self.transport = Some(transport);
                Err(e)
            }
        }
    }

    /// Stop the listener, join its thread and take the transport back.
    ///
    /// Reads still queued are dispatched before this returns; no handler
    /// call happens afterwards. Stopping a stopped listener is a no-op.
    pub fn stop_listener(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        match self
            .listener_state
            .transition(ListenerState::Running, ListenerState::Stopping)
        {
            Ok(()) | Err(ListenerState::Stopping) => {}
            Err(other) => tracing::warn!(state = ?other, "Stopping listener from unexpected state"),
        }

        let (transport, leftover) = listener.join();
        let _ = self
            .listener_state
            .transition(ListenerState::Stopping, ListenerState::Stopped);
        if transport.is_none() {
            tracing::error!("Listener did not hand back the transport");
            self.kind = None;
        }
        self.transport = transport;

        let drained = leftover.len();
        for raw in leftover {
            self.dispatch_raw(&raw);
        }
        let dropped = self.dropped_reads();
        if dropped > 0 {
            tracing::warn!(drained, dropped, "Listener stopped, some reads were dropped");
        } else {
            tracing::info!(drained, "Listener stopped");
        }
    }

    /// Replace the trigger handler; takes effect at the next dispatch.
    pub fn set_trigger_handler<H: TriggerHandler + 'static>(&mut self, handler: H) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_trigger_handler(&mut self) {
        self.handler = None;
    }

    fn dispatch_raw(&mut self, raw: &str) {
        match self.handler.as_mut() {
            Some(handler) => handler.on_receive_raw(raw),
            None => tracing::debug!(bytes = raw.len(), "No trigger handler, dropping read"),
        }
    }

    /// Deliver every queued listener read to the handler.
    ///
    /// Returns the number of reads delivered. If the listener thread hit a
    /// transport fault it is stopped here, after which the device reports
    /// disconnected.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(raw) = self.listener.as_ref().and_then(|l| l.try_recv()) {
            self.dispatch_raw(&raw);
            delivered += 1;
        }
        if self.listener.as_ref().is_some_and(|l| l.faulted()) {
            tracing::warn!("Listener faulted, stopping");
            self.stop_listener();
        }
        delivered
    }

    /// Wait up to `timeout` for a listener read, then deliver everything
    /// queued.
    pub fn wait_and_dispatch(&mut self, timeout: Duration) -> usize {
        match self.listener.as_ref().and_then(|l| l.recv_timeout(timeout)) {
            Some(raw) => {
                self.dispatch_raw(&raw);
                1 + self.dispatch_pending()
            }
            None => self.dispatch_pending(),
        }
    }
}

impl Drop for ProbeDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{SimHandle, SimTransport};
    use std::sync::Mutex;

    fn connected() -> (ProbeDevice, SimHandle) {
        let (transport, handle) = SimTransport::new("6");
        let mut device = ProbeDevice::new(ProbeConfig::default());
        device.connect_with(Box::new(transport)).unwrap();
        (device, handle)
    }

    fn collecting(device: &mut ProbeDevice) -> Arc<Mutex<Vec<TriggerMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        device.set_trigger_handler(move |msg: TriggerMessage| sink.lock().unwrap().push(msg));
        seen
    }

    fn trigger(t: i64) -> TriggerMessage {
        TriggerMessage {
            tag: 'L',
            t,
            value: (t % 2) as i32,
            count: 1,
        }
    }

    #[test]
    fn test_connect_sequence() {
        let (device, handle) = connected();
        assert!(device.is_connected());
        assert_eq!(device.transport_kind(), Some(TransportKind::Simulated));
        assert_eq!(device.listener_state(), ListenerState::Stopped);

        let clock = device.clock().unwrap();
        assert_eq!(clock.min_lag, 0);
        assert!(clock.max_lag >= 0);

        let received = handle.received();
        assert_eq!(&received[..3], b"FVZ");
    }

    #[test]
    fn test_version_mismatch_disconnects() {
        let (transport, _handle) = SimTransport::new("5");
        let mut device = ProbeDevice::new(ProbeConfig::default());
        let err = device.connect_with(Box::new(transport)).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::VersionMismatch { ref expected, ref actual } if expected == "6" && actual == "5"
        ));
        assert!(err.is_protocol_mismatch());
        assert!(!device.is_connected());
        assert!(matches!(device.command(b'V'), Err(ProbeError::NotConnected)));
    }

    #[test]
    fn test_command_returns_payload() {
        let (mut device, _handle) = connected();
        assert_eq!(device.command(b'V').unwrap(), "6");
        assert_eq!(device.command(b'B').unwrap(), "");
    }

    #[test]
    fn test_read_one_times_out() {
        let (mut device, _handle) = connected();
        assert!(matches!(device.read_one(), Err(ProbeError::Timeout(_))));
    }

    #[test]
    fn test_extra_operations() {
        let (mut device, handle) = connected();
        handle.set_last_shock(4242);
        assert_eq!(device.read_last_shock_time().unwrap(), 4242);

        handle.set_last_laser(trigger(777));
        let msg = device
            .read_trigger_message(protocol::CMD_SEND_LAST_LASER)
            .unwrap();
        assert_eq!(msg, trigger(777));

        let rtt = device.ping().unwrap();
        assert!(rtt < Duration::from_millis(200));

        let clock = device.simple_sync_clock().unwrap();
        assert_eq!(clock.min_lag, 0);
        assert_eq!(device.clock(), Some(clock));
    }

    #[test]
    fn test_trigger_message_wrong_ack() {
        let (mut device, _handle) = connected();
        let err = device.read_trigger_message(b'B').unwrap_err();
        assert!(matches!(
            err,
            ProbeError::AckMismatch {
                expected: 'G',
                actual: Some('b')
            }
        ));
    }

    #[test]
    fn test_check_drift_keeps_base_time() {
        let (mut device, _handle) = connected();
        let before = device.clock().unwrap();
        let report = device.check_drift().unwrap();
        let after = device.clock().unwrap();
        assert_eq!(after.base_time, before.base_time);
        assert_eq!(report.min_lag, after.min_lag);
        assert_eq!(report.max_lag, after.max_lag);
        assert!(report.min_lag <= report.max_lag);
    }

    #[test]
    fn test_drift_report_flags_high_mean() {
        let clock = RemoteClockInfo {
            base_time: 0,
            min_lag: 2000,
            max_lag: 2400,
        };
        let report = DriftReport::new(&clock, 1500);
        assert_eq!(report.mean_lag, 2200);
        assert!(report.high_drift);

        let clock = clock.with_lag(-2400, -2000);
        assert!(DriftReport::new(&clock, 1500).high_drift);
        assert!(!DriftReport::new(&clock.with_lag(-100, 100), 1500).high_drift);
    }

    #[test]
    fn test_blocking_ops_conflict_with_listener() {
        let (mut device, _handle) = connected();
        device.start_listener().unwrap();
        assert_eq!(device.listener_state(), ListenerState::Running);

        assert!(matches!(
            device.sync_clock(),
            Err(ProbeError::ListenerConflict(_))
        ));
        assert!(matches!(
            device.check_drift(),
            Err(ProbeError::ListenerConflict(_))
        ));
        assert!(matches!(
            device.read_one(),
            Err(ProbeError::ListenerConflict(_))
        ));
        assert!(matches!(
            device.start_listener(),
            Err(ProbeError::ListenerConflict(_))
        ));

        device.stop_listener();
        assert_eq!(device.listener_state(), ListenerState::Stopped);
        assert!(device.sync_clock().is_ok());
    }

    #[test]
    fn test_start_listener_requires_connection() {
        let mut device = ProbeDevice::new(ProbeConfig::default());
        assert!(matches!(
            device.start_listener(),
            Err(ProbeError::ListenerConflict(_))
        ));
        assert_eq!(device.listener_state(), ListenerState::Stopped);
    }

    #[test]
    fn test_command_while_listening_is_fire_and_forget() {
        let (mut device, handle) = connected();
        let seen = collecting(&mut device);
        device.start_listener().unwrap();

        let started = Instant::now();
        assert_eq!(device.command(b'C').unwrap(), "");
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(handle.received().last(), Some(&b'C'));

        // The "c" ack goes to the handler, which drops it as malformed
        device.stop_listener();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_triggers_dispatched_in_order() {
        let (mut device, handle) = connected();
        let seen = collecting(&mut device);
        device.start_listener().unwrap();

        for t in 1..=3 {
            handle.emit_trigger(&trigger(t));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 3 && Instant::now() < deadline {
            device.wait_and_dispatch(Duration::from_millis(50));
        }
        device.stop_listener();

        let seen = seen.lock().unwrap();
        let times: Vec<i64> = seen.iter().map(|m| m.t).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_stop_delivers_queue_then_nothing() {
        let (mut device, handle) = connected();
        let seen = collecting(&mut device);
        device.start_listener().unwrap();

        handle.emit_trigger(&trigger(10));
        handle.emit_trigger(&trigger(11));
        std::thread::sleep(Duration::from_millis(100));
        device.stop_listener();
        let count = seen.lock().unwrap().len();
        assert_eq!(count, 2);

        handle.emit_trigger(&trigger(12));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(device.dispatch_pending(), 0);
        assert_eq!(seen.lock().unwrap().len(), count);
    }

    #[test]
    fn test_cleared_handler_drops_reads() {
        let (mut device, handle) = connected();
        let seen = collecting(&mut device);
        device.clear_trigger_handler();
        device.start_listener().unwrap();

        handle.emit_trigger(&trigger(5));
        std::thread::sleep(Duration::from_millis(50));
        device.stop_listener();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unplug_while_listening() {
        let (mut device, handle) = connected();
        device.start_listener().unwrap();
        handle.unplug();

        let deadline = Instant::now() + Duration::from_secs(2);
        while device.is_connected() && Instant::now() < deadline {
            device.wait_and_dispatch(Duration::from_millis(20));
        }
        assert!(!device.is_connected());

        device.dispatch_pending();
        assert_eq!(device.listener_state(), ListenerState::Stopped);
        assert!(matches!(device.command(b'V'), Err(ProbeError::NotConnected)));
        assert!(matches!(device.sync_clock(), Err(ProbeError::NotConnected)));
    }

    #[test]
    fn test_overflow_counts_dropped_reads() {
        let (transport, handle) = SimTransport::new("6");
        let config = ProbeConfig {
            listener_queue_capacity: 1,
            ..Default::default()
        };
        let mut device = ProbeDevice::new(config);
        device.connect_with(Box::new(transport)).unwrap();
        let seen = collecting(&mut device);
        device.start_listener().unwrap();
        assert_eq!(device.dropped_reads(), 0);

        for t in 0..20 {
            handle.emit_trigger(&trigger(t));
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(50));
        device.stop_listener();

        let dropped = device.dropped_reads();
        assert!(dropped > 0);
        assert!(seen.lock().unwrap().len() < 20);

        device.start_listener().unwrap();
        assert_eq!(device.dropped_reads(), 0);
        device.stop_listener();
    }

    #[test]
    fn test_command_after_unplug_reports_not_connected() {
        let (mut device, handle) = connected();
        device.start_listener().unwrap();
        handle.unplug();

        let deadline = Instant::now() + Duration::from_secs(2);
        while device.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!device.is_connected());
        assert!(matches!(device.command(b'V'), Err(ProbeError::NotConnected)));
        assert_eq!(device.listener_state(), ListenerState::Stopped);
    }

    #[test]
    fn test_disconnect_clears_clock() {
        let (mut device, _handle) = connected();
        device.start_listener().unwrap();
        device.disconnect();
        assert!(!device.is_connected());
        assert_eq!(device.clock(), None);
        assert_eq!(device.listener_state(), ListenerState::Stopped);
        assert!(matches!(device.check_drift(), Err(ProbeError::NotConnected)));
    }
}
