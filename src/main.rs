//! netlens CLI entry point.
//!
//! A small single-threaded host around the session: it services the
//! bridge from its own loop, prints status lines and log records, and
//! stops after the requested duration.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use netlens::dissect::builtin::default_dissectors;
use netlens::stream::HttpStreamDissector;
use netlens::{Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "netlens", version, about = "Live packet capture and analysis")]
struct Args {
    /// Capture interface (default: first available device)
    #[arg(short, long)]
    interface: Option<String>,

    /// BPF capture filter expression
    #[arg(short, long)]
    bpf: Option<String>,

    /// Named view filter, as name=expression (repeatable)
    #[arg(short, long)]
    filter: Vec<String>,

    /// Capture duration in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Enable promiscuous mode
    #[arg(short, long)]
    promiscuous: bool,

    /// Snapshot length in bytes
    #[arg(long, default_value_t = 65535)]
    snaplen: u32,

    /// Worker threads per pool (default: hardware parallelism - 1)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    if args.list_devices {
        return list_devices();
    }

    if !Session::permission() {
        bail!("no capture permission; run with CAP_NET_RAW or as root");
    }

    let mut session = Session::new(SessionConfig {
        namespace: "netlens".into(),
        threads: args.threads,
        dissectors: default_dissectors(),
        stream_dissectors: vec![std::sync::Arc::new(HttpStreamDissector::new("netlens"))],
        ..SessionConfig::default()
    });

    if let Some(interface) = &args.interface {
        session.set_interface(interface);
    }
    session.set_promiscuous(args.promiscuous);
    session.set_snaplen(args.snaplen);

    if let Some(expr) = &args.bpf {
        session
            .set_bpf(expr)
            .with_context(|| format!("invalid BPF expression: {expr}"))?;
    }

    for pair in &args.filter {
        let (name, expr) = pair
            .split_once('=')
            .with_context(|| format!("filter must be name=expression: {pair}"))?;
        session
            .filter(name, expr)
            .with_context(|| format!("invalid filter {name}"))?;
    }

    session.set_status_callback(|status| {
        let views: Vec<String> = status
            .filtered
            .iter()
            .map(|(name, count)| format!("{name}={count}"))
            .collect();
        println!(
            "capturing={} packets={} [{}]",
            status.capturing,
            status.packets,
            views.join(" ")
        );
    });
    session.set_log_callback(|msg| {
        eprintln!("[{}] {}: {}", msg.level, msg.domain, msg.message);
    });

    session.start().context("failed to start capture")?;

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    while Instant::now() < deadline {
        session.poll();
        std::thread::sleep(Duration::from_millis(200));
    }

    session.stop();
    // Let in-flight packets drain, then deliver the final snapshot.
    std::thread::sleep(Duration::from_millis(300));
    session.poll();

    println!("captured {} packets", session.packets());
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = Session::devices().context("failed to enumerate devices")?;
    if devices.is_empty() {
        println!("no capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!(
            "{:<16} link={:<4} loopback={:<5} {}",
            dev.name, dev.link, dev.loopback, dev.description
        );
    }
    Ok(())
}
