//! Pedestal control server
//!
//! Runs the UDP link to the pedestal firmware and serves the HTTP API.
//!
//! Settings are layered: command line flags, then `PEDESTAL_*` environment
//! variables, then the optional JSON settings file, then built-in defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pedestal::{
    api, EnvSettings, JsonFileSettings, LayeredSettings, MapSettings, Pedestal, PedestalConfig,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Antenna pedestal control server
#[derive(Parser, Debug)]
#[command(name = "pedestal_server")]
#[command(about = "Antenna pedestal control server (ICD over UDP, HTTP API)")]
#[command(version)]
struct Args {
    /// JSON settings file with dotted keys, e.g. {"udp.send_interval_ms": 30}
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address (overrides api.bind_address)
    #[arg(short, long)]
    bind: Option<String>,

    /// Firmware UDP address (overrides udp.firmware_address)
    #[arg(short, long)]
    firmware: Option<String>,

    /// Local UDP bind address (overrides udp.local_address)
    #[arg(short, long)]
    local: Option<String>,
}

fn load_config(args: &Args) -> Result<PedestalConfig> {
    let mut overrides = MapSettings::new();
    if let Some(bind) = &args.bind {
        overrides.insert("api.bind_address", bind);
    }
    if let Some(firmware) = &args.firmware {
        overrides.insert("udp.firmware_address", firmware);
    }
    if let Some(local) = &args.local {
        overrides.insert("udp.local_address", local);
    }

    let mut settings = LayeredSettings::new()
        .push(overrides)
        .push(EnvSettings::new(EnvSettings::DEFAULT_PREFIX));
    if let Some(path) = &args.config {
        let file = JsonFileSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        settings = settings.push(file);
    }

    PedestalConfig::from_settings(&settings).context("Invalid configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("Configuration: {:?}", config);

    let listener = TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind HTTP API on {}", config.api.bind_address))?;

    let pedestal = Pedestal::udp(config).context("Failed to build pedestal service")?;
    pedestal.start();

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(api::serve(pedestal.clone(), listener, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Received ctrl-c, shutting down");

    shutdown.cancel();
    pedestal.shutdown().await;
    server
        .await
        .context("HTTP server task failed")?
        .context("HTTP server error")?;

    info!("Pedestal server stopped");
    Ok(())
}
