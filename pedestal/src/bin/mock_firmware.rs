//! Mock pedestal firmware
//!
//! Serves the firmware simulator over UDP so `pedestal_server` can run
//! without hardware. Faults can be raised at startup:
//!
//! ```text
//! mock_firmware --bind 127.0.0.1:9001 --fault azimuthBoardServoStatusBits:0
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use icd::StatusRegister;
use pedestal::sim::{serve_udp, FirmwareSimulator};
use strum::IntoEnumIterator;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Mock antenna pedestal firmware
#[derive(Parser, Debug)]
#[command(name = "mock_firmware")]
#[command(about = "Simulated pedestal firmware speaking the ICD protocol over UDP")]
#[command(version)]
struct Args {
    /// UDP address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9001")]
    bind: String,

    /// Status bit to raise at startup, as <register key>:<bit> (repeatable)
    #[arg(long = "fault", value_parser = parse_fault)]
    faults: Vec<(StatusRegister, u8)>,

    /// Initial azimuth angle in degrees
    #[arg(long, default_value_t = 0.0)]
    azimuth: f32,

    /// Initial elevation angle in degrees
    #[arg(long, default_value_t = 45.0)]
    elevation: f32,

    /// Initial train angle in degrees
    #[arg(long, default_value_t = 0.0)]
    train: f32,
}

fn parse_fault(text: &str) -> Result<(StatusRegister, u8)> {
    let (key, bit) = text
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <register>:<bit>, got '{text}'"))?;
    let register = StatusRegister::iter()
        .find(|r| r.key() == key)
        .ok_or_else(|| anyhow!("unknown register '{key}'"))?;
    let bit: u8 = bit.parse().with_context(|| format!("invalid bit '{bit}'"))?;
    if bit > 7 {
        return Err(anyhow!("bit {bit} out of range 0..=7"));
    }
    Ok((register, bit))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let sim = FirmwareSimulator::shared();
    {
        let mut sim = sim.lock().map_err(|_| anyhow!("simulator lock poisoned"))?;
        sim.set_angle(icd::Axis::Azimuth, args.azimuth);
        sim.set_angle(icd::Axis::Elevation, args.elevation);
        sim.set_angle(icd::Axis::Train, args.train);
        for (register, bit) in &args.faults {
            info!("Raising {} bit {}", register, bit);
            sim.inject_fault(*register, *bit, true);
        }
    }

    let socket = UdpSocket::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    let cancel = CancellationToken::new();
    let server = tokio::spawn(serve_udp(socket, sim, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    cancel.cancel();
    server.await.context("Mock firmware task failed")?;
    Ok(())
}
