//! cdrgen - 911 CDR traffic simulator
//!
//! Usage:
//!   cdrgen --config config.json
//!   cdrgen --config config.json --validate
//!   cdrgen --list-formats

mod logging;

use cdrgen_core::{Config, DeviceOpener, FormatRegistry, OutputManager};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "cdrgen", version)]
#[command(about = "911 CDR traffic simulator for collector load and correctness testing")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,

    /// List registered CDR formats and exit
    #[arg(long)]
    list_formats: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let registry = Arc::new(FormatRegistry::with_builtin_formats());

    if cli.list_formats {
        println!("Registered CDR formats:");
        if registry.is_empty() {
            println!("  (none registered)");
        }
        registry.for_each(|name, format| println!("  {:<10} - {}", name, format.description()));
        return ExitCode::SUCCESS;
    }

    let Some(config_path) = cli.config else {
        eprintln!("Error: --config is required (see --help)");
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(errors) = config.validate(&registry.list()) {
        eprintln!("Configuration validation failed:");
        for err in errors.iter() {
            eprintln!("  {}", err);
        }
        return ExitCode::FAILURE;
    }

    if cli.validate {
        print_summary(&config);
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init(&config.logging, cli.debug) {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %config.app.instance_id,
        ports = config.ports.len(),
        "cdrgen starting"
    );

    let startup_delay = config.timing.startup_delay();
    if !startup_delay.is_zero() {
        info!(delay_sec = startup_delay.as_secs(), "delaying startup");
        tokio::select! {
            _ = tokio::time::sleep(startup_delay) => {}
            _ = shutdown_signal() => {
                info!("shutdown requested before startup");
                return ExitCode::SUCCESS;
            }
        }
    }

    let stats_interval = config.timing.stats_interval();
    let manager = Arc::new(OutputManager::new(config, registry, Arc::new(DeviceOpener)));

    let started = match manager.start().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to start output manager");
            manager.stop().await;
            return ExitCode::FAILURE;
        }
    };

    let start_time = Instant::now();
    info!(channels = started, "cdrgen running");

    let reporter = (!stats_interval.is_zero())
        .then(|| tokio::spawn(report_stats(manager.clone(), stats_interval)));

    shutdown_signal().await;
    info!("cdrgen shutting down");

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    manager.stop().await;

    let totals = manager.totals();
    info!(
        uptime_sec = start_time.elapsed().as_secs(),
        channels = started,
        records_sent = totals.records_sent,
        bytes_sent = totals.bytes_sent,
        errors = totals.errors,
        "cdrgen stopped"
    );

    ExitCode::SUCCESS
}

fn print_summary(config: &Config) {
    println!("Configuration is valid");
    println!("  Instance: {}", config.app.instance_id);
    println!("  Ports configured: {}", config.ports.len());
    for (i, port) in config.ports.iter().enumerate().filter(|(_, p)| p.enabled) {
        println!(
            "    [{}] {} - {} mode, {} format, {} baud",
            i, port.device, port.mode, port.format, port.baud_rate
        );
    }
}

/// Log every channel's snapshot and the totals once per interval
async fn report_stats(manager: Arc<OutputManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for (device, channel) in manager.channel_infos() {
            info!(
                device = %device,
                state = %channel.state,
                records_sent = channel.stats.records_sent,
                bytes_sent = channel.stats.bytes_sent,
                errors = channel.stats.errors,
                reconnects = channel.stats.reconnects,
                "channel stats"
            );
        }
        let totals = manager.totals();
        info!(
            channels = totals.channels,
            records_sent = totals.records_sent,
            bytes_sent = totals.bytes_sent,
            errors = totals.errors,
            "totals"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "received shutdown signal"),
        _ = terminate => info!(signal = "SIGTERM", "received shutdown signal"),
    }
}
