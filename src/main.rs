//! pathwatch binary entry point.
//!
//! `pathwatch probe` runs an engine until Ctrl+C and prints every probe
//! result; `pathwatch respond` runs the UDP echo responder.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pathwatch::config::{DEFAULT_UDP_PORT, parse_duration};
use pathwatch::responder::DEFAULT_BIND;
use pathwatch::{AppConfig, Engine, EngineConfig, ProbeResult, Protocol, Responder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pathwatch - network path quality prober
#[derive(Parser, Debug)]
#[command(name = "pathwatch", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe a target on a fixed cadence
    Probe(ProbeArgs),
    /// Answer UDP echo probes
    Respond(RespondArgs),
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Target host or IP address (overrides config file)
    target: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "PATHWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Echo transport
    #[arg(long, value_enum, env = "PATHWATCH_PROTOCOL")]
    protocol: Option<ProtocolArg>,

    /// UDP responder port
    #[arg(long, env = "PATHWATCH_PORT")]
    port: Option<u16>,

    /// Time between round starts, e.g. 5s
    #[arg(long, value_parser = parse_duration, env = "PATHWATCH_INTERVAL")]
    interval: Option<Duration>,

    /// Probes per round
    #[arg(long, env = "PATHWATCH_SAMPLES")]
    samples: Option<usize>,

    /// Gap between probes within a round, e.g. 100ms
    #[arg(long, value_parser = parse_duration, env = "PATHWATCH_SPACING")]
    spacing: Option<Duration>,

    /// Per-probe read timeout, e.g. 3s
    #[arg(long, value_parser = parse_duration, env = "PATHWATCH_TIMEOUT")]
    timeout: Option<Duration>,

    /// Window summarized after every round, e.g. 1m
    #[arg(long, value_parser = parse_duration, env = "PATHWATCH_RETENTION")]
    retention: Option<Duration>,

    /// Print probe results as JSON lines
    #[arg(long, env = "PATHWATCH_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct RespondArgs {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_BIND, env = "PATHWATCH_BIND")]
    bind: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProtocolArg {
    Icmp,
    Udp,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so probe output on stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pathwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Probe(args) => probe(args).await,
        Command::Respond(args) => respond(args).await,
    }
}

async fn probe(args: ProbeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args)?;
    let json = config.output.json;
    let mut history = config.probe.new_history();

    let mut engine = Engine::new(config.probe);
    engine
        .start_with(move |round| {
            for probe in round.results() {
                print_result(probe, json);
            }
            if let Some(history) = history.as_mut() {
                history.push(round);
                tracing::info!(summary = %history.summary(), "Window summary");
            }
        })
        .await?;

    tracing::info!("Press Ctrl+C to stop");
    shutdown_signal().await;

    engine.stop().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn respond(args: RespondArgs) -> Result<(), Box<dyn std::error::Error>> {
    let responder = Responder::bind(&args.bind).await?;
    tracing::info!("Press Ctrl+C to stop");
    responder.run(shutdown_signal()).await?;
    Ok(())
}

/// Merge the config file with CLI/env overrides (CLI > ENV > config file).
fn build_config(args: ProbeArgs) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            AppConfig::load(path)?
        }
        None => {
            let target = args
                .target
                .clone()
                .ok_or("a target is required when no config file is given")?;
            AppConfig {
                probe: EngineConfig::new(target),
                output: Default::default(),
            }
        }
    };

    let probe = &mut config.probe;
    if let Some(target) = args.target {
        probe.target = target;
    }
    match (args.protocol, args.port) {
        (Some(ProtocolArg::Icmp), port) => {
            if port.is_some() {
                tracing::warn!("--port is ignored for ICMP");
            }
            probe.protocol = Protocol::Icmp;
        }
        (Some(ProtocolArg::Udp), port) => {
            let current = match probe.protocol {
                Protocol::Udp { port } => port,
                Protocol::Icmp => DEFAULT_UDP_PORT,
            };
            probe.protocol = Protocol::Udp {
                port: port.unwrap_or(current),
            };
        }
        (None, Some(port)) => match &mut probe.protocol {
            Protocol::Udp { port: current } => *current = port,
            Protocol::Icmp => tracing::warn!("--port is ignored for ICMP"),
        },
        (None, None) => {}
    }
    if let Some(interval) = args.interval {
        probe.interval = interval;
    }
    if let Some(samples) = args.samples {
        probe.samples = samples;
    }
    if let Some(spacing) = args.spacing {
        probe.spacing = spacing;
    }
    if let Some(timeout) = args.timeout {
        probe.timeout = timeout;
    }
    if let Some(retention) = args.retention {
        probe.retention = Some(retention);
    }
    if args.json {
        config.output.json = true;
    }

    config.validate()?;
    Ok(config)
}

fn print_result(probe: &ProbeResult, json: bool) {
    if json {
        match serde_json::to_string(probe) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(seq = probe.sequence(), error = %e, "Failed to encode result"),
        }
        return;
    }

    let line = format!(
        "Time: {}, SeqNum: {}, State: {}, Latency: {:.6}",
        probe.captured_at().timestamp_millis(),
        probe.sequence(),
        probe.state(),
        probe.latency_secs(),
    );
    match probe.error_cause() {
        Some(cause) => println!("{line}, Error: {cause}"),
        None => println!("{line}"),
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
