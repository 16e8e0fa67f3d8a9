//! VRing Daemon Entry Point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use treadmill_agent_common::AgentResult;
use treadmill_vringd::config::DEFAULT_CONFIG_PATH;
use treadmill_vringd::{
    discovery, DiscoveryEvent, IptablesGateway, RunStats, StopReason, SystemResolver,
    VRingDaemonConfig, VRingMgr,
};

/// Treadmill virtual ring NAT reconciler
#[derive(Parser, Debug)]
#[command(name = "vringd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Firewall chain owned by the ring
    #[arg(long)]
    chain: Option<String>,

    /// Virtual port for an endpoint, as NAME=PORT (repeatable)
    #[arg(long = "port-map", value_parser = parse_port_mapping)]
    port_map: Vec<(String, u16)>,

    /// Endpoint name to translate (repeatable)
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,

    /// Hostname to leave untranslated (repeatable)
    #[arg(long)]
    skip: Vec<String>,

    /// Discovery service address, or '-' for stdin
    #[arg(long)]
    discovery: Option<String>,

    /// Discovery watch pattern
    #[arg(long)]
    pattern: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_port_mapping(s: &str) -> Result<(String, u16), String> {
    let (name, port) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PORT, got '{}'", s))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{}': {}", port, e))?;
    Ok((name.to_string(), port))
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(true).compact())
            .init();
    }
}

/// File settings overridden by whatever was given on the command line
fn load_config(args: &Args) -> anyhow::Result<VRingDaemonConfig> {
    let mut config = VRingDaemonConfig::load_or_default(&args.config)?;

    if let Some(chain) = &args.chain {
        config.chain = chain.clone();
    }
    config.port_map.extend(args.port_map.iter().cloned());
    if !args.endpoints.is_empty() {
        config.endpoints = args.endpoints.clone();
    }
    config.skip.extend(args.skip.iter().cloned());
    if let Some(address) = &args.discovery {
        config.discovery.address = address.clone();
    }
    if let Some(pattern) = &args.pattern {
        config.discovery.pattern = pattern.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        token.cancel();
    });
    Ok(())
}

/// A discovery watch only ends when vringd is told to stop
fn check_stop(stats: &RunStats, watching: bool) -> anyhow::Result<()> {
    if watching && stats.stop == StopReason::FeedEnded {
        anyhow::bail!("discovery watch closed by peer");
    }
    Ok(())
}

async fn run_ring<S>(
    config: &VRingDaemonConfig,
    feed: S,
    watching: bool,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: Stream<Item = AgentResult<DiscoveryEvent>> + Unpin,
{
    let gateway = IptablesGateway::new(&config.iptables.command, config.iptables.wait);
    let mut mgr = VRingMgr::new(config.vring(), gateway, SystemResolver)
        .with_retry(config.retry_policy());

    let result = mgr.run_feed(feed, cancel).await;

    let stats = mgr.stats();
    info!(
        events = stats.events,
        added = stats.added,
        updated = stats.updated,
        removed = stats.removed,
        ignored = stats.ignored,
        dropped = stats.dropped,
        firewall_errors = stats.firewall_errors,
        "vringd stopped"
    );

    let stats = result.with_context(|| format!("vring {}", config.chain))?;
    check_stop(&stats, watching)
}

async fn run_daemon(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!(
        chain = %config.chain,
        endpoints = ?config.endpoints,
        skip = ?config.skip,
        "Starting vringd"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    if config.discovery.address == "-" {
        run_ring(&config, discovery::stdin_feed(), false, cancel).await
    } else {
        let feed = discovery::connect(&config.discovery.address, &config.discovery.pattern).await?;
        run_ring(&config, feed, true, cancel).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run_daemon(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vringd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
