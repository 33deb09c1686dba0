//! Clock synchronization exchanges
//!
//! Direct transports (USB and the simulator) run a round-trip exchange:
//!
//! 1. Zero the probe clock with `'Z'` and take the reply time as the first
//!    upper bound on the lag.
//! 2. Send the digits `1..9` with short gaps, read back the probe's receive
//!    times with `'R'`: every `local_sent - remote_received` is a lower
//!    bound on the lag.
//! 3. Ask the probe to send the digits (`'I'`), timestamp their arrival and
//!    read back the probe's send times: every
//!    `local_received - remote_sent` is an upper bound.
//!
//! Steps 2 and 3 repeat a fixed number of times, then the base time is
//! shifted so the lower bound becomes zero. The TCP bridge runs the same
//! exchange on its side and reports the result.

use std::thread;
use std::time::{Duration, Instant};

use crate::clock::{local_micros, RemoteClockInfo};
use crate::error::ProbeError;
use crate::protocol::{
    self, parse_ack, parse_bridge_clock, parse_sync_readout, BridgeClock, CMD_SYNC_READOUT,
    CMD_SYNC_SEND, CMD_SYNC_ZERO,
};
use crate::transport::{read_line, Transport, TransportKind};

/// Bound-improvement rounds per sync
const SYNC_REPEATS: usize = 7;

/// Inter-digit sleep is a tenth of the current bound width, clamped
const SLEEP_DIVIDER: i64 = 10;
const MIN_SLEEP_US: i64 = 70;
const MAX_SLEEP_US: i64 = 700;

/// Per-read timeout while waiting for the probe's sync digits
const DIGIT_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Starting bounds for a lag refresh (±10 s)
const REFRESH_BOUND_US: i64 = 10_000_000;

/// The bridge runs a full exchange before it answers
const BRIDGE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Working lag bounds, wider than the stored `i32` while iterating
#[derive(Debug, Clone, Copy)]
struct LagBounds {
    min: i64,
    max: i64,
}

fn to_lag(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Full clock sync over whatever backend `transport` is.
pub fn sync_clock(
    transport: &mut dyn Transport,
    reply_timeout: Duration,
) -> Result<RemoteClockInfo, ProbeError> {
    match transport.kind() {
        TransportKind::Bridge => bridge_sync(transport),
        TransportKind::Usb | TransportKind::Simulated => round_trip_sync(transport, reply_timeout),
    }
}

/// Re-measure the lag bounds of `clock` without touching its base time.
pub fn update_bounds(
    transport: &mut dyn Transport,
    clock: &RemoteClockInfo,
    reply_timeout: Duration,
) -> Result<RemoteClockInfo, ProbeError> {
    match transport.kind() {
        TransportKind::Bridge => bridge_update(transport, clock),
        TransportKind::Usb | TransportKind::Simulated => {
            let mut bounds = LagBounds {
                min: -REFRESH_BOUND_US,
                max: REFRESH_BOUND_US,
            };
            for _ in 0..SYNC_REPEATS {
                improve_bounds(transport, clock.base_time, &mut bounds, reply_timeout)?;
            }
            Ok(clock.with_lag(to_lag(bounds.min), to_lag(bounds.max)))
        }
    }
}

/// Single `'Z'` exchange; the lag uncertainty is the full round trip.
pub fn simple_sync(
    transport: &mut dyn Transport,
    reply_timeout: Duration,
) -> Result<RemoteClockInfo, ProbeError> {
    let (base, bounds) = zero_remote(transport, reply_timeout)?;
    Ok(RemoteClockInfo {
        base_time: base,
        min_lag: 0,
        max_lag: to_lag(bounds.max),
    })
}

/// Zero the probe clock and the round-trip sync built on top of it.
pub fn round_trip_sync(
    transport: &mut dyn Transport,
    reply_timeout: Duration,
) -> Result<RemoteClockInfo, ProbeError> {
    let (base, mut bounds) = zero_remote(transport, reply_timeout)?;
    for _ in 0..SYNC_REPEATS {
        improve_bounds(transport, base, &mut bounds, reply_timeout)?;
    }

    // Shift the base so the lower bound is zero
    let clock = RemoteClockInfo {
        base_time: base + bounds.min,
        min_lag: 0,
        max_lag: to_lag(bounds.max - bounds.min),
    };
    tracing::info!(
        base_time = clock.base_time,
        max_lag = clock.max_lag,
        "Clock synchronized"
    );
    Ok(clock)
}

fn zero_remote(
    transport: &mut dyn Transport,
    reply_timeout: Duration,
) -> Result<(i64, LagBounds), ProbeError> {
    transport.flush_input()?;
    let base = local_micros();
    transport.send_byte(CMD_SYNC_ZERO)?;
    let reply = read_line(transport, reply_timeout)?.ok_or(ProbeError::Timeout(reply_timeout))?;
    parse_ack(protocol::flip_case(char::from(CMD_SYNC_ZERO)), &reply)?;
    let round_trip = local_micros() - base;
    tracing::debug!(round_trip_us = round_trip, "sync_zero");
    Ok((
        base,
        LagBounds {
            min: 0,
            max: round_trip,
        },
    ))
}

fn improve_bounds(
    transport: &mut dyn Transport,
    base: i64,
    bounds: &mut LagBounds,
    reply_timeout: Duration,
) -> Result<(), ProbeError> {
    improve_min_lag(transport, base, bounds, reply_timeout)?;
    improve_max_lag(transport, base, bounds, reply_timeout)
}

fn improve_min_lag(
    transport: &mut dyn Transport,
    base: i64,
    bounds: &mut LagBounds,
    reply_timeout: Duration,
) -> Result<(), ProbeError> {
    let sleep_us = ((bounds.max - bounds.min) / SLEEP_DIVIDER).clamp(MIN_SLEEP_US, MAX_SLEEP_US);

    transport.flush_input()?;
    let mut local_sent = [0i64; 9];
    for (digit, slot) in (b'1'..=b'9').zip(local_sent.iter_mut()) {
        *slot = local_micros() - base;
        transport.send_byte(digit)?;
        thread::sleep(Duration::from_micros(sleep_us as u64));
    }

    let remote_received = read_remote_times(transport, reply_timeout)?;
    for (tls, trr) in local_sent.iter().zip(remote_received.iter()) {
        if let Some(trr) = trr {
            bounds.min = bounds.min.max(tls - trr);
        }
    }
    tracing::debug!(
        min_lag = bounds.min,
        max_lag = bounds.max,
        sleep_us,
        "improve_min_lag"
    );
    Ok(())
}

fn improve_max_lag(
    transport: &mut dyn Transport,
    base: i64,
    bounds: &mut LagBounds,
    reply_timeout: Duration,
) -> Result<(), ProbeError> {
    transport.send_byte(CMD_SYNC_SEND)?;

    // Digits may arrive batched or out of order; stamp each on first sight
    let mut local_received: [Option<i64>; 9] = [None; 9];
    let mut seen = 0;
    let deadline = Instant::now() + reply_timeout;
    let mut buf = [0u8; 64];
    while seen < local_received.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!(seen, "Sync digits missing");
            break;
        }
        let n = transport.blocking_read(&mut buf, remaining.min(DIGIT_READ_TIMEOUT))?;
        let t_local = local_micros() - base;
        for &b in &buf[..n] {
            if let b'1'..=b'9' = b {
                let slot = &mut local_received[usize::from(b - b'1')];
                if slot.is_none() {
                    *slot = Some(t_local);
                    seen += 1;
                }
            }
        }
    }

    // Trailing line feeds
    transport.flush_input()?;
    let remote_sent = read_remote_times(transport, reply_timeout)?;
    for (tlr, trs) in local_received.iter().zip(remote_sent.iter()) {
        if let (Some(tlr), Some(trs)) = (tlr, trs) {
            bounds.max = bounds.max.min(tlr - trs);
        }
    }
    tracing::debug!(min_lag = bounds.min, max_lag = bounds.max, "improve_max_lag");
    Ok(())
}

/// Read the probe's nine recorded sync timestamps.
fn read_remote_times(
    transport: &mut dyn Transport,
    reply_timeout: Duration,
) -> Result<[Option<i64>; 9], ProbeError> {
    let mut times = [None; 9];
    for expected in 1..=9u8 {
        transport.send_byte(CMD_SYNC_READOUT)?;
        let reply = read_line(transport, reply_timeout)?;
        match reply.as_deref().and_then(parse_sync_readout) {
            Some((digit, t)) if (1..=9).contains(&digit) => {
                if digit != expected {
                    tracing::debug!(expected, digit, "Out of order sync readout");
                }
                times[usize::from(digit - 1)] = Some(t);
            }
            _ => tracing::debug!(expected, reply = ?reply, "Bad sync readout reply"),
        }
    }
    Ok(times)
}

/// Host wall-clock minus local monotonic clock (µs)
fn wall_offset_us() -> i64 {
    let before = local_micros();
    let wall = chrono::Utc::now().timestamp_micros();
    let after = local_micros();
    wall - (before + after) / 2
}

fn bridge_request(transport: &mut dyn Transport, request: &str) -> Result<BridgeClock, ProbeError> {
    transport.flush_input()?;
    tracing::debug!(request, "bridge_request");
    transport.send(request.as_bytes())?;
    let reply = read_line(transport, BRIDGE_REPLY_TIMEOUT)?
        .ok_or(ProbeError::Timeout(BRIDGE_REPLY_TIMEOUT))?;
    parse_bridge_clock(&reply)
}

/// Full sync through the bridge; its wall-clock base is moved onto the
/// local monotonic timebase.
pub fn bridge_sync(transport: &mut dyn Transport) -> Result<RemoteClockInfo, ProbeError> {
    let reported = bridge_request(transport, protocol::BRIDGE_SYNC)?;
    let clock = RemoteClockInfo {
        base_time: reported.wall_base_us - wall_offset_us(),
        min_lag: reported.min_lag,
        max_lag: reported.max_lag,
    };
    tracing::info!(
        base_time = clock.base_time,
        max_lag = clock.max_lag,
        "Clock synchronized through bridge"
    );
    Ok(clock)
}

/// Lag refresh through the bridge; the local base time is kept.
pub fn bridge_update(
    transport: &mut dyn Transport,
    clock: &RemoteClockInfo,
) -> Result<RemoteClockInfo, ProbeError> {
    let reported = bridge_request(transport, protocol::BRIDGE_UPDATE)?;
    Ok(clock.with_lag(reported.min_lag, reported.max_lag))
}
