//! OBD Diagnostics - Main Entry Point
//!
//! Discovers ELM327 BLE adapters, streams live data and runs full bus scans.
//! Output is JSON on stdout; logs go to stderr.

mod commands;
mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obd_transport::mock::{Elm327Script, MockAdapter};
use obd_transport::BleAdapter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::logging::init_logging;

#[derive(Parser)]
#[command(name = "obd-diag")]
#[command(author, version, about = "ELM327 BLE OBD-II diagnostics")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "OBD_CONFIG")]
    config: Option<PathBuf>,

    /// Use the built-in emulated adapter instead of Bluetooth
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby BLE devices
    ScanDevices,

    /// Poll live data and print the collected values
    Live {
        /// Device to connect to (default: first likely adapter)
        #[arg(short, long)]
        device: Option<String>,

        /// How long to poll, in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },

    /// Sweep the bus for modules and trouble codes
    Diagnose {
        /// Device to connect to (default: first likely adapter)
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Send one raw command (e.g. `0902` or `ATRV`) and print the reply
    Send {
        /// Device to connect to (default: first likely adapter)
        #[arg(short, long)]
        device: Option<String>,

        /// Command text
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.log_level, config.log_format);

    info!("=== OBD Diagnostics v{} ===", env!("CARGO_PKG_VERSION"));

    let adapter = open_adapter(cli.mock).await?;

    match &cli.command {
        Commands::ScanDevices => {
            let devices = commands::scan_devices(adapter, &config).await?;
            print_json(&devices)?;
        }

        Commands::Live { device, seconds } => {
            let report = commands::live(
                adapter,
                &config,
                device.as_deref(),
                Duration::from_secs(*seconds),
            )
            .await?;
            print_json(&report)?;
        }

        Commands::Diagnose { device } => {
            let report = commands::diagnose(adapter, &config, device.as_deref()).await?;
            print_json(&report)?;
        }

        Commands::Send { device, command } => {
            let report = commands::send(adapter, &config, device.as_deref(), command).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

async fn open_adapter(mock: bool) -> Result<Arc<dyn BleAdapter>> {
    if mock {
        info!("Using emulated ELM327 adapter");
        return Ok(Arc::new(MockAdapter::new(Elm327Script::default())));
    }
    native_adapter().await
}

#[cfg(feature = "bluest")]
async fn native_adapter() -> Result<Arc<dyn BleAdapter>> {
    let adapter = obd_transport::BluestAdapter::new()
        .await
        .context("opening Bluetooth adapter")?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "bluest"))]
async fn native_adapter() -> Result<Arc<dyn BleAdapter>> {
    anyhow::bail!("built without Bluetooth support; rebuild with `--features bluest` or pass --mock")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
