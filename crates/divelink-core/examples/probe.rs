//! Dive Computer Probe
//!
//! Walks the handshake plan against a connected dive computer and prints which
//! baud rate, wake prefix and encoding it answered to.
//!
//! Usage:
//!   cargo run --example probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --config FILE     JSON download config (defaults apply otherwise)
//!   --baud RATE       Only try this baud rate
//!   --timeout MS      Per-attempt response timeout
//!   --listen MS       Open at the first baud and dump unsolicited bytes
//!   --report FILE     Write the attempt history as JSON
//!
//! With no port, the available serial ports are listed.
//! Set RUST_LOG=divelink_core=debug for a byte-level trace.

use anyhow::{bail, Context, Result};
use divelink_core::prelude::*;
use divelink_core::protocol::{annotate_response, list_ports};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Args {
    port: Option<String>,
    config: Option<String>,
    baud: Option<u32>,
    timeout_ms: Option<u64>,
    listen_ms: Option<u64>,
    report: Option<String>,
}

fn parse_args() -> Result<Option<Args>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args::default();
    let mut iter = argv.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => args.config = Some(iter.next().context("--config needs a path")?),
            "--baud" | "-b" => {
                let value = iter.next().context("--baud needs a value")?;
                args.baud = Some(value.parse().context("invalid baud rate")?);
            }
            "--timeout" | "-t" => {
                let value = iter.next().context("--timeout needs a value")?;
                args.timeout_ms = Some(value.parse().context("invalid timeout")?);
            }
            "--listen" | "-l" => {
                let value = iter.next().context("--listen needs a value")?;
                args.listen_ms = Some(value.parse().context("invalid listen duration")?);
            }
            "--report" | "-r" => args.report = Some(iter.next().context("--report needs a path")?),
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other if !other.starts_with('-') => args.port = Some(other.to_string()),
            other => bail!("unknown option: {}", other),
        }
    }
    Ok(Some(args))
}

fn print_help() {
    println!("Dive Computer Probe");
    println!();
    println!("Usage: probe [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --config, -c FILE   JSON download config");
    println!("  --baud, -b RATE     Only try this baud rate");
    println!("  --timeout, -t MS    Per-attempt response timeout");
    println!("  --listen, -l MS     Dump unsolicited bytes instead of probing");
    println!("  --report, -r FILE   Write the attempt history as JSON");
    println!("  --help, -h          Show this help");
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    println!("Available ports:");
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "  {}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.unwrap_or_default()
            ),
            _ => println!("  {}", port.name),
        }
    }
}

fn listen(config: &DownloadConfig, factory: &mut SerialPortFactory, ms: u64) -> Result<()> {
    let baud = config.bauds.first().copied().context("no baud rate configured")?;
    let mut session = Session::open(factory, config.serial.with_baud(baud), config.timing())
        .with_context(|| format!("cannot open {}", config.port))?;

    println!("Listening on {} at {} baud for {}ms...", config.port, baud, ms);
    let bytes = session.listen(Duration::from_millis(ms))?;
    if bytes.is_empty() {
        println!("Nothing received");
    } else {
        println!("Received {} bytes: {:02x?}", bytes.len(), bytes);
        println!("  {:?}", annotate_response(&bytes));
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut config = match &args.config {
        Some(path) => DownloadConfig::load(path)?,
        None => DownloadConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(baud) = args.baud {
        config.bauds = vec![baud];
    }
    if let Some(ms) = args.timeout_ms {
        config.response_timeout_ms = ms;
    }
    config.validate()?;

    if config.port.is_empty() {
        print_ports();
        return Ok(());
    }

    let mut factory = SerialPortFactory::new(&config.port);

    if let Some(ms) = args.listen_ms {
        return listen(&config, &mut factory, ms);
    }

    let plan = config.plan();
    println!(
        "Probing {} with {} attempts...",
        config.port,
        plan.attempt_count()
    );

    let result = run_handshake(&mut factory, &plan);
    let report = HandshakeReport::from_result(&result);

    if let Some(path) = &args.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("cannot write report to {}", path))?;
        println!("Report written to {}", path);
    }

    match result {
        Ok(success) => {
            println!(
                "Device answered attempt {} at {} baud ({}, {})",
                success.attempt.index,
                success.attempt.baud,
                success.attempt.encoding(),
                success.attempt.command
            );
            println!("Payload: {}", success.frame.payload_hex());
            println!(
                "Payload (text): {}",
                String::from_utf8_lossy(&success.frame.payload)
            );
            Ok(())
        }
        Err(err) => {
            for record in report.history.iter() {
                println!(
                    "  #{:<3} {:>5} baud  {:<20} {:?}",
                    record.attempt.index,
                    record.attempt.baud,
                    record.attempt.encoding().to_string(),
                    record.outcome
                );
            }
            Err(err.into())
        }
    }
}
