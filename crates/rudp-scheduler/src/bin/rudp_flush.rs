//! # rudp-flush
//!
//! Drives the send scheduler against a real UDP peer with synthetic
//! mixed-priority traffic, then prints the scheduler stats as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # 2 seconds of traffic to a local listener
//! rudp-flush --target 127.0.0.1:9000 --duration-ms 2000
//!
//! # Custom scheduler settings
//! rudp-flush --target 127.0.0.1:9000 --config scheduler.toml
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rudp_scheduler::config::SchedulerConfig;
use rudp_scheduler::priority::Priority;
use rudp_scheduler::runtime::SchedulerRuntime;
use rudp_scheduler::scheduler::SchedulerEvent;
use rudp_scheduler::transport::UdpTransport;

/// Traffic mix per round, heaviest class first.
const MIX: [(Priority, usize, usize); 4] = [
    (Priority::Immediate, 1, 32),
    (Priority::High, 4, 200),
    (Priority::Medium, 4, 400),
    (Priority::Low, 4, 900),
];

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read config '{}': {}", path, e))?;
            SchedulerConfig::from_toml_str(&text)?
        }
        None => SchedulerConfig::default(),
    };

    tracing::info!(
        target_addr = %args.target,
        duration_ms = args.duration_ms,
        tick_ms = config.tick_interval.as_millis() as u64,
        "rudp-flush starting"
    );

    // ── Scheduler ───────────────────────────────────────────────
    let transport = Arc::new(UdpTransport::bind("0.0.0.0:0")?);
    tracing::info!(local = %transport.local_addr()?, "socket bound");
    let mut runtime = SchedulerRuntime::start(config, transport)?;
    let handle = runtime.handle();
    let events = runtime.events();

    // ── Traffic ─────────────────────────────────────────────────
    let deadline = Instant::now() + Duration::from_millis(args.duration_ms);
    let mut round: u64 = 0;
    while Instant::now() < deadline {
        for (priority, count, size) in MIX {
            for _ in 0..count {
                let payload = Bytes::from(vec![round as u8; size]);
                if let Err(e) = handle.enqueue(payload, priority, args.target) {
                    tracing::warn!(class = %priority, error = %e, "enqueue refused");
                }
            }
        }
        round += 1;
        std::thread::sleep(Duration::from_millis(5));
    }

    // ── Teardown ────────────────────────────────────────────────
    let cancelled = runtime.on_connection_closed();
    runtime.shutdown();

    let mut failures = 0usize;
    for event in events.try_iter() {
        if let SchedulerEvent::TransportFailed { .. } = event {
            failures += 1;
        }
    }

    let stats = handle.stats();
    tracing::info!(
        rounds = round,
        cancelled = cancelled.len(),
        failure_events = failures,
        aggregation = stats.aggregation_ratio(),
        "rudp-flush stopped"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

struct Args {
    target: SocketAddr,
    config: Option<String>,
    duration_ms: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut target = None;
    let mut config = None;
    let mut duration_ms = 1000u64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--target" | "-t" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--target requires a value"))?;
                target = Some(
                    val.parse::<SocketAddr>()
                        .map_err(|e| anyhow::anyhow!("invalid target '{}': {}", val, e))?,
                );
            }
            "--config" | "-c" => {
                i += 1;
                config = Some(
                    args.get(i)
                        .ok_or_else(|| anyhow::anyhow!("--config requires a value"))?
                        .clone(),
                );
            }
            "--duration-ms" | "-d" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--duration-ms requires a value"))?;
                duration_ms = val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid duration '{}': {}", val, e))?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    if target.is_none() {
        if let Ok(val) = std::env::var("RUDP_TARGET") {
            target = Some(val.trim().parse()?);
        }
    }
    let target = target.ok_or_else(|| {
        anyhow::anyhow!("no target specified. Use --target or RUDP_TARGET.\nRun with --help for usage.")
    })?;

    Ok(Args {
        target,
        config,
        duration_ms,
    })
}

fn print_help() {
    println!(
        "rudp-flush: drive the priority send scheduler with synthetic traffic

USAGE:
    rudp-flush --target <addr> [OPTIONS]

OPTIONS:
    -t, --target <addr>        Destination UDP address (env: RUDP_TARGET)
    -c, --config <path>        Scheduler TOML config
    -d, --duration-ms <ms>     Traffic duration [default: 1000]
    -h, --help                 Print this help

LOGGING:
    RUST_LOG=debug rudp-flush ...   per-tick detail"
    );
}
