//! Latprobe - command-line front end for the timing probe
//!
//! Lists probes, syncs the probe clock and reports drift, sends single
//! commands, or prints trigger messages until Ctrl+C.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use latprobe::config::TransportPreference;
use latprobe::transport::usb;
use latprobe::{ProbeConfig, ProbeDevice, TriggerMessage};
use thiserror::Error;
use tracing::info;

/// How long one listen iteration waits for probe output
const LISTEN_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
enum CliError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Command must be a single ASCII character, got {0:?}")]
    InvalidCommand(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Help,
    Version,
    List,
    Sync,
    Command(u8),
    Listen,
}

#[derive(Debug)]
struct Args {
    mode: Mode,
    config_path: PathBuf,
    transport: Option<TransportPreference>,
    serial_path: Option<String>,
    save_config: bool,
    json: bool,
}

fn parse_command(value: &str) -> Result<u8, CliError> {
    match value.as_bytes() {
        [c] if c.is_ascii_graphic() => Ok(*c),
        _ => Err(CliError::InvalidCommand(value.to_string())),
    }
}

fn parse_args(args: &[String]) -> Result<Args, CliError> {
    let mut parsed = Args {
        mode: Mode::Help,
        config_path: latprobe::config_path(),
        transport: None,
        serial_path: None,
        save_config: false,
        json: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => parsed.mode = Mode::List,
            "--sync" | "-s" => parsed.mode = Mode::Sync,
            "--listen" => parsed.mode = Mode::Listen,
            "--version" | "-v" => parsed.mode = Mode::Version,
            "--help" | "-h" => {
                parsed.mode = Mode::Help;
                return Ok(parsed);
            }
            "--command" | "-c" => {
                let value = args.get(i + 1).ok_or(CliError::MissingValue("--command"))?;
                parsed.mode = Mode::Command(parse_command(value)?);
                i += 1;
            }
            "--config" => {
                let value = args.get(i + 1).ok_or(CliError::MissingValue("--config"))?;
                parsed.config_path = PathBuf::from(value);
                i += 1;
            }
            "--port" | "-p" => {
                let value = args.get(i + 1).ok_or(CliError::MissingValue("--port"))?;
                parsed.serial_path = Some(value.clone());
                parsed.transport = Some(TransportPreference::Usb);
                i += 1;
            }
            "--usb" => parsed.transport = Some(TransportPreference::Usb),
            "--bridge" => parsed.transport = Some(TransportPreference::Bridge),
            "--save-config" => parsed.save_config = true,
            "--json" => parsed.json = true,
            arg => return Err(CliError::UnknownArgument(arg.to_string())),
        }
        i += 1;
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("latprobe=info".parse()?),
        )
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            return Ok(());
        }
    };

    let mut config = ProbeConfig::load_from(&args.config_path);
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if args.serial_path.is_some() {
        config.serial_path = args.serial_path.clone();
    }
    if args.save_config {
        config
            .save(&args.config_path)
            .with_context(|| format!("saving config to {}", args.config_path.display()))?;
        println!("Config saved to {}", args.config_path.display());
    }

    match args.mode {
        Mode::Help => print_help(),
        Mode::Version => println!("latprobe {} (built {})", latprobe::VERSION, latprobe::BUILD_DATE),
        Mode::List => list_probes(&config)?,
        Mode::Sync => run_sync(config, args.json)?,
        Mode::Command(cmd) => run_command(config, cmd)?,
        Mode::Listen => run_listen(config)?,
    }
    Ok(())
}

fn print_help() {
    println!("Usage: latprobe [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List USB probes");
    println!("  -s, --sync              Connect, sync the clock and report drift");
    println!("  -c, --command CHAR      Send one command and print its reply");
    println!("      --listen            Print trigger messages until Ctrl+C");
    println!("      --usb               Force direct USB");
    println!("      --bridge            Force the TCP bridge");
    println!("  -p, --port PATH         Serial port to open (implies --usb)");
    println!("      --config PATH       Config file (default: {})", latprobe::config_path().display());
    println!("      --save-config       Write the effective config back to disk");
    println!("      --json              Machine-readable output for --sync");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  latprobe --sync");
    println!("  latprobe --bridge --command B");
    println!("  latprobe --port /dev/ttyACM0 --listen");
}

fn list_probes(config: &ProbeConfig) -> Result<()> {
    let probes = usb::list_probes(config.usb_vendor_id, config.usb_bootloader_pid)
        .context("listing serial ports")?;
    if probes.is_empty() {
        println!(
            "No probes found (USB vendor id {:04x}).",
            config.usb_vendor_id
        );
        return Ok(());
    }
    println!("Found {} probe(s):", probes.len());
    println!();
    for (i, probe) in probes.iter().enumerate() {
        println!("  {}. {}", i + 1, probe.path);
        println!("     USB id: {:04x}:{:04x}", probe.vid, probe.pid);
        if let Some(product) = &probe.product {
            println!("     Product: {}", product);
        }
        if let Some(serial) = &probe.serial_number {
            println!("     Serial: {}", serial);
        }
    }
    Ok(())
}

fn connect(config: ProbeConfig) -> Result<ProbeDevice> {
    let mut device = ProbeDevice::new(config);
    device.connect().context("connecting to probe")?;
    if let Some(kind) = device.transport_kind() {
        info!(transport = %kind, "Connected");
    }
    Ok(device)
}

fn run_sync(config: ProbeConfig, json: bool) -> Result<()> {
    let mut device = connect(config)?;
    let clock = match device.clock() {
        Some(clock) => clock,
        None => device.sync_clock().context("syncing probe clock")?,
    };
    let drift = device.check_drift().context("checking drift")?;

    if json {
        let report = serde_json::json!({
            "transport": device.transport_kind().map(|k| k.to_string()),
            "base_time": clock.base_time,
            "min_lag": drift.min_lag,
            "max_lag": drift.max_lag,
            "mean_lag": drift.mean_lag,
            "high_drift": drift.high_drift,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", clock);
        println!(
            "Drift: mean {} us, bounds ({}, {}){}",
            drift.mean_lag,
            drift.min_lag,
            drift.max_lag,
            if drift.high_drift { " HIGH" } else { "" }
        );
    }
    device.disconnect();
    Ok(())
}

fn run_command(config: ProbeConfig, cmd: u8) -> Result<()> {
    let mut device = connect(config)?;
    let payload = device
        .command(cmd)
        .with_context(|| format!("sending command {:?}", char::from(cmd)))?;
    println!("{}", payload);
    device.disconnect();
    Ok(())
}

fn run_listen(config: ProbeConfig) -> Result<()> {
    let mut device = connect(config)?;
    let clock = device.clock();
    device.set_trigger_handler(move |msg: TriggerMessage| match clock {
        Some(clock) => println!("{}  (local {} us)", msg, clock.to_local(msg.t)),
        None => println!("{}", msg),
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    device.start_listener().context("starting listener")?;
    println!("Listening for triggers. Press Ctrl+C to stop.");

    while running.load(Ordering::SeqCst) && device.is_connected() {
        device.wait_and_dispatch(LISTEN_POLL);
    }
    device.stop_listener();

    if !device.is_connected() {
        println!("Probe disconnected.");
    }
    println!("Done.");
    Ok(())
}
