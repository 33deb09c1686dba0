//! E2E tests for the command protocol
//!
//! Acknowledged commands, the version handshake and trigger-line parsing,
//! driven through `ProbeDevice` against the simulated probe.

use latprobe::protocol::{self, flip_case, parse_ack, parse_bridge_clock};
use latprobe::transport::sim::SimTransport;
use latprobe::{ProbeConfig, ProbeDevice, ProbeError, TriggerMessage};

fn connected() -> (ProbeDevice, latprobe::transport::sim::SimHandle) {
    let (transport, handle) = SimTransport::new("6");
    let mut device = ProbeDevice::new(ProbeConfig::default());
    device.connect_with(Box::new(transport)).unwrap();
    (device, handle)
}

#[test]
fn test_every_plain_command_is_acked_with_flipped_case() {
    let (mut device, _handle) = connected();
    for cmd in [
        protocol::CMD_PING_DELAYED,
        protocol::CMD_AUTO_SCREEN_ON,
        protocol::CMD_AUTO_SCREEN_OFF,
        protocol::CMD_BRIGHTNESS_CURVE,
        protocol::CMD_AUTO_LASER_ON,
        protocol::CMD_AUTO_LASER_OFF,
        protocol::CMD_AUDIO,
        protocol::CMD_BEEP,
        protocol::CMD_BEEP_STOP,
        protocol::CMD_MIDI,
        protocol::CMD_NOTE,
    ] {
        assert_eq!(device.command(cmd).unwrap(), "", "command {}", char::from(cmd));
    }
}

#[test]
fn test_version_handshake() {
    let (mut device, _handle) = connected();
    assert_eq!(device.check_version().unwrap(), "6");

    let (transport, _handle) = SimTransport::new("7");
    let mut stale = ProbeDevice::new(ProbeConfig::default());
    let err = stale.connect_with(Box::new(transport)).unwrap_err();
    assert!(err.is_protocol_mismatch());
    assert!(!stale.is_connected());
}

#[test]
fn test_expected_version_is_configurable() {
    let (transport, _handle) = SimTransport::new("7");
    let mut device = ProbeDevice::new(ProbeConfig {
        protocol_version: "7".to_string(),
        ..Default::default()
    });
    device.connect_with(Box::new(transport)).unwrap();
    assert!(device.is_connected());
}

#[test]
fn test_silence_is_a_timeout() {
    let (mut device, _handle) = connected();
    assert!(matches!(device.read_one(), Err(ProbeError::Timeout(_))));
}

#[test]
fn test_trigger_replies() {
    let (mut device, handle) = connected();
    let msg = TriggerMessage {
        tag: 'L',
        t: 987_654,
        value: 1,
        count: 4,
    };
    handle.set_last_laser(msg);
    assert_eq!(
        device
            .read_trigger_message(protocol::CMD_SEND_LAST_LASER)
            .unwrap(),
        msg
    );

    handle.set_last_shock(123_456);
    assert_eq!(device.read_last_shock_time().unwrap(), 123_456);
}

#[test]
fn test_ack_helpers() {
    assert_eq!(flip_case('B'), 'b');
    assert_eq!(flip_case('z'), 'Z');
    assert_eq!(parse_ack('v', "v  6 \r\n").unwrap(), "6");
    assert!(matches!(
        parse_ack('a', ""),
        Err(ProbeError::AckMismatch {
            expected: 'a',
            actual: None
        })
    ));
}

#[test]
fn test_trigger_line_acceptance() {
    assert!(TriggerMessage::is_trigger_line("G A 12 0 1"));
    assert!(TriggerMessage::is_trigger_line("G\tC 12\t1"));
    assert!(!TriggerMessage::is_trigger_line("G a 12 0 1"));
    assert!(!TriggerMessage::is_trigger_line("X A 12 0 1"));
    assert!(!TriggerMessage::is_trigger_line("G A -12 0"));

    let msg = TriggerMessage::parse_line("G C 5000 1 2").unwrap();
    assert_eq!((msg.tag, msg.t, msg.value, msg.count), ('C', 5000, 1, 2));
    assert_eq!(msg.to_string(), "G C 5000 1 2");

    assert!(matches!(
        TriggerMessage::parse_line("G L 10"),
        Err(ProbeError::MalformedMessage(_))
    ));
}

#[test]
fn test_bridge_clock_reply() {
    let clock = parse_bridge_clock("clock 1700000000000000 -15 420\n").unwrap();
    assert_eq!(clock.wall_base_us, 1_700_000_000_000_000);
    assert_eq!((clock.min_lag, clock.max_lag), (-15, 420));
    assert!(parse_bridge_clock("time 1 2 3").is_err());
    assert!(parse_bridge_clock("clock 1 2").is_err());
}
