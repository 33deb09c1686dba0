//! Probe wire protocol
//!
//! Every command is a single ASCII byte. A synchronous reply starts with the
//! command character with its case flipped (`'V'` is answered by `'v'`), and
//! the rest of the reply, trimmed, is the payload.
//!
//! Asynchronous probe events arrive as trigger lines of the form
//! `"G <TAG> <t> <value> <count>"`, and the TCP bridge answers its own
//! `"bridge ..."` requests with `"clock <wallBase> <minLag> <maxLag>"`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProbeError;

pub const CMD_PING_DELAYED: u8 = b'D';
pub const CMD_RESET: u8 = b'F';
pub const CMD_SYNC_SEND: u8 = b'I';
pub const CMD_PING: u8 = b'P';
pub const CMD_VERSION: u8 = b'V';
pub const CMD_SYNC_READOUT: u8 = b'R';
pub const CMD_GSHOCK: u8 = b'G';
pub const CMD_TIME_NOW: u8 = b'T';
pub const CMD_SYNC_ZERO: u8 = b'Z';
pub const CMD_AUTO_SCREEN_ON: u8 = b'C';
pub const CMD_AUTO_SCREEN_OFF: u8 = b'c';
pub const CMD_SEND_LAST_SCREEN: u8 = b'E';
pub const CMD_BRIGHTNESS_CURVE: u8 = b'U';
pub const CMD_AUTO_LASER_ON: u8 = b'L';
pub const CMD_AUTO_LASER_OFF: u8 = b'l';
pub const CMD_SEND_LAST_LASER: u8 = b'J';
pub const CMD_AUDIO: u8 = b'A';
pub const CMD_BEEP: u8 = b'B';
pub const CMD_BEEP_STOP: u8 = b'S';
pub const CMD_MIDI: u8 = b'M';
pub const CMD_NOTE: u8 = b'N';
pub const CMD_ACCELEROMETER: u8 = b'O';

/// Leading character shared by every trigger line
pub const TRIGGER_PREFIX: char = 'G';

/// Bridge request for a full clock sync
pub const BRIDGE_SYNC: &str = "bridge sync";

/// Bridge request for a lag-bounds refresh
pub const BRIDGE_UPDATE: &str = "bridge update";

/// Swap ASCII case; non-letters map to themselves.
pub fn flip_case(c: char) -> char {
    if c.is_ascii_uppercase() {
        c.to_ascii_lowercase()
    } else if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

/// Check a reply against the expected ack character and return its payload.
///
/// # Arguments
/// * `expected` - Ack character the reply must start with
/// * `response` - Raw reply text as read from the transport
///
/// # Example
/// ```
/// use latprobe_core::protocol::parse_ack;
///
/// assert_eq!(parse_ack('v', "v 6\n").unwrap(), "6");
/// assert!(parse_ack('v', "x").is_err());
/// ```
pub fn parse_ack(expected: char, response: &str) -> Result<String, ProbeError> {
    let mut chars = response.chars();
    match chars.next() {
        Some(c) if c == expected => Ok(chars.as_str().trim().to_string()),
        actual => Err(ProbeError::AckMismatch { expected, actual }),
    }
}

fn trigger_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^G\s+[A-Z]\s+\d+\s+\d+").expect("trigger pattern is a valid regex")
    })
}

/// A probe-initiated event notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerMessage {
    /// Event source (`'L'` laser, `'A'` audio, `'C'` screen, ...)
    pub tag: char,
    /// Probe-local timestamp in microseconds
    pub t: i64,
    /// Event value (e.g. 0 = light to dark, 1 = dark to light)
    pub value: i32,
    /// How many times this trigger fired since the last readout
    pub count: i32,
}

impl TriggerMessage {
    /// Whether `line` has the shape of a trigger line.
    pub fn is_trigger_line(line: &str) -> bool {
        trigger_pattern().is_match(line.trim())
    }

    /// Parse a full trigger line, e.g. `"G L 12902345 1 1"`.
    ///
    /// Lines that fail the pattern, or whose numeric fields do not fit, are
    /// rejected with [`ProbeError::MalformedMessage`].
    pub fn parse_line(line: &str) -> Result<Self, ProbeError> {
        let trimmed = line.trim();
        if !Self::is_trigger_line(trimmed) {
            return Err(ProbeError::MalformedMessage(trimmed.to_string()));
        }
        let malformed = || ProbeError::MalformedMessage(trimmed.to_string());

        // Skip the shared 'G' prefix, the pattern guarantees it is there
        let mut parts = trimmed[1..].split_whitespace();
        let tag = parts
            .next()
            .and_then(|s| s.chars().next())
            .ok_or_else(malformed)?;
        let t = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let value = parts
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(malformed)?;
        // Older firmware omits the counter
        let count = match parts.next() {
            Some(s) => s.parse::<i32>().map_err(|_| malformed())?,
            None => 1,
        };

        Ok(Self {
            tag,
            t,
            value,
            count,
        })
    }
}

impl fmt::Display for TriggerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            TRIGGER_PREFIX, self.tag, self.t, self.value, self.count
        )
    }
}

/// Clock state reported by the TCP bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeClock {
    /// Remote zero in host wall-clock microseconds
    pub wall_base_us: i64,
    pub min_lag: i32,
    pub max_lag: i32,
}

/// Parse a bridge reply of the form `"clock <wallBase> <minLag> <maxLag>"`.
pub fn parse_bridge_clock(reply: &str) -> Result<BridgeClock, ProbeError> {
    let malformed = || ProbeError::MalformedMessage(reply.trim().to_string());
    let mut parts = reply.split_whitespace();
    if parts.next() != Some("clock") {
        return Err(malformed());
    }
    let mut next_num = || -> Result<i64, ProbeError> {
        parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(malformed)
    };
    let wall_base_us = next_num()?;
    let min_lag = i32::try_from(next_num()?).map_err(|_| malformed())?;
    let max_lag = i32::try_from(next_num()?).map_err(|_| malformed())?;

    Ok(BridgeClock {
        wall_base_us,
        min_lag,
        max_lag,
    })
}

/// Parse a sync readout reply, `"<digit> <t>"` or `"<digit>:<t>"`.
///
/// Returns the digit and the probe timestamp in microseconds.
pub fn parse_sync_readout(reply: &str) -> Option<(u8, i64)> {
    let trimmed = reply.trim();
    let digit = trimmed.chars().next()?.to_digit(10)? as u8;
    let rest = trimmed[1..].trim_start_matches([':', ' ', '\t']);
    let t = rest.split_whitespace().next()?.parse::<i64>().ok()?;
    Some((digit, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_case() {
        assert_eq!(flip_case('A'), 'a');
        assert_eq!(flip_case('c'), 'C');
        assert_eq!(flip_case('5'), '5');
        assert_eq!(flip_case(' '), ' ');
    }

    #[test]
    fn test_parse_ack_strips_and_trims() {
        assert_eq!(parse_ack('a', "a  payload \r\n").unwrap(), "payload");
        assert_eq!(parse_ack('b', "b").unwrap(), "");
    }

    #[test]
    fn test_parse_ack_mismatch_carries_both_chars() {
        match parse_ack('a', "zzz") {
            Err(ProbeError::AckMismatch { expected, actual }) => {
                assert_eq!(expected, 'a');
                assert_eq!(actual, Some('z'));
            }
            other => panic!("Expected AckMismatch, got {:?}", other),
        }
        match parse_ack('a', "") {
            Err(ProbeError::AckMismatch { actual, .. }) => assert_eq!(actual, None),
            other => panic!("Expected AckMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_trigger_round_trip() {
        let msg = TriggerMessage::parse_line("G A 12345 7 3").unwrap();
        assert_eq!(msg.tag, 'A');
        assert_eq!(msg.t, 12345);
        assert_eq!(msg.value, 7);
        assert_eq!(msg.count, 3);
        assert_eq!(msg.to_string(), "G A 12345 7 3");
        assert_eq!(TriggerMessage::parse_line(&msg.to_string()).unwrap(), msg);
    }

    #[test]
    fn test_trigger_with_surrounding_whitespace() {
        let msg = TriggerMessage::parse_line("  G L 12902345 1 1\r\n").unwrap();
        assert_eq!(msg.tag, 'L');
        assert_eq!(msg.t, 12902345);
    }

    #[test]
    fn test_trigger_rejects_missing_fields() {
        assert!(!TriggerMessage::is_trigger_line("G A 12345"));
        assert!(matches!(
            TriggerMessage::parse_line("G A 12345"),
            Err(ProbeError::MalformedMessage(_))
        ));
        assert!(TriggerMessage::parse_line("G a 1 2 3").is_err());
        assert!(TriggerMessage::parse_line("end").is_err());
        assert!(TriggerMessage::parse_line("").is_err());
    }

    #[test]
    fn test_trigger_count_defaults_to_one() {
        let msg = TriggerMessage::parse_line("G C 500 1").unwrap();
        assert_eq!(msg.count, 1);
    }

    #[test]
    fn test_trigger_rejects_overflowing_value() {
        assert!(TriggerMessage::parse_line("G A 1 99999999999 1").is_err());
    }

    #[test]
    fn test_parse_bridge_clock() {
        let clock = parse_bridge_clock("clock 1466716492000000 0 350\n").unwrap();
        assert_eq!(clock.wall_base_us, 1466716492000000);
        assert_eq!(clock.min_lag, 0);
        assert_eq!(clock.max_lag, 350);

        assert!(parse_bridge_clock("clock 1 2").is_err());
        assert!(parse_bridge_clock("time 1 2 3").is_err());
    }

    #[test]
    fn test_parse_sync_readout_formats() {
        assert_eq!(parse_sync_readout("3 4711\n"), Some((3, 4711)));
        assert_eq!(parse_sync_readout("7:123"), Some((7, 123)));
        assert_eq!(parse_sync_readout("x 1"), None);
        assert_eq!(parse_sync_readout("4"), None);
    }
}
