use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chanflux::duration::{format_duration, parse_duration};
use chanflux::output::write_event;
use chanflux::settings::{parse_channel, Settings, StreamSettings};
use chanflux::simulate::Driver;
use chanflux_core::{Gateway, SimulatedClient};

#[derive(Parser, Debug)]
#[command(name = "chanflux")]
#[command(about = "Stream control-system channels to consumers as filtered, time-ordered change-sets")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (e.g. "debug", "chanflux_core=trace"); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Simulated channel, `name` or `alias=name` (repeatable)
    #[arg(short = 'C', long = "channel")]
    channels: Vec<String>,

    /// Descriptor for a stream over the --channel list
    #[arg(short, long, requires = "channels")]
    descriptor: Option<String>,

    /// Simulation update period (e.g. "250ms", "1s")
    #[arg(short, long)]
    period: Option<String>,

    /// Stop after this long (e.g. "30s"); runs until Ctrl-C otherwise
    #[arg(long)]
    run_for: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    apply_args(&mut settings, &args)?;
    settings.validate()?;

    init_tracing(args.log_level.as_deref(), &settings.log_level)?;

    let run_for = args.run_for.as_deref().map(parse_duration).transpose()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(settings, run_for))
}

/// Layer command-line flags over the loaded settings.
fn apply_args(settings: &mut Settings, args: &Args) -> Result<()> {
    if let Some(period) = &args.period {
        let period = parse_duration(period)?;
        settings.simulation.period_ms = period.as_millis() as u64;
    }

    if !args.channels.is_empty() {
        // Aliases are a stream concern; the simulation only needs names.
        settings.simulation.channels = args
            .channels
            .iter()
            .map(|spec| parse_channel(spec).control_system_name().to_string())
            .collect();
        settings.streams = vec![StreamSettings {
            descriptor: args.descriptor.clone().unwrap_or_else(|| "{}".to_string()),
            channels: args.channels.clone(),
        }];
    }
    Ok(())
}

/// Log to stderr so stdout carries only events.
fn init_tracing(flag: Option<&str>, configured: &str) -> Result<()> {
    let filter = match flag {
        Some(level) => EnvFilter::try_new(level)?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(configured)?,
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

async fn run(settings: Settings, run_for: Option<Duration>) -> Result<()> {
    let client = Arc::new(SimulatedClient::new());
    let driver = Arc::new(Driver::new(client.clone(), &settings.simulation));
    info!(
        "simulating {} channels every {}",
        driver.channel_names().len(),
        format_duration(settings.simulation.period())
    );
    let simulation = Arc::clone(&driver).spawn(settings.simulation.period());

    let gateway = Gateway::new(client, settings.gateway_config());

    let mut forwarders = Vec::new();
    for stream in settings.effective_streams() {
        let id = gateway
            .create_stream_from_descriptor(&stream.descriptor, stream.channel_names())
            .await
            .with_context(|| format!("failed to create stream over {:?}", stream.channels))?;
        let mut events = gateway.take_receiver(id)?;

        forwarders.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut out = io::stdout().lock();
                if let Err(e) = write_event(&mut out, &event) {
                    warn!("writing event for {}: {}", id, e);
                    break;
                }
            }
        }));
    }
    info!("serving {} streams", gateway.stream_count());

    match run_for {
        Some(limit) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = tokio::time::sleep(limit) => info!("ran for {}", format_duration(limit)),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }

    gateway.close().await;
    simulation.abort();
    for forwarder in forwarders {
        let _ = forwarder.await;
    }
    Ok(())
}
