//! # Pulse Server
//!
//! Hosts the subscription, presence and history engine.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! pulse
//!
//! # Run with custom config
//! pulse --config /path/to/pulse.toml
//!
//! # Print the effective configuration
//! pulse --print-config
//!
//! # Run with environment variables
//! PULSE__PORT=8080 PULSE__ENGINE__BACKEND=shared pulse
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tenvis_pulse_server::{handlers, metrics, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pulse state engine server.
#[derive(Debug, Parser)]
#[command(name = "pulse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenvis_pulse_server=debug,tenvis_pulse_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!(
        "Starting Pulse server on {}:{} ({:?} engine)",
        config.host,
        config.port,
        config.engine.backend
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
