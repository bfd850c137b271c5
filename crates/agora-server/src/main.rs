//! # Agora Server
//!
//! Realtime WebSocket fan-out server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! agora
//!
//! # Run with custom config
//! agora --config /path/to/agora.toml
//!
//! # Run with environment variables
//! AGORA_PORT=8080 AGORA_HOST=0.0.0.0 agora
//! AGORA__LIMITS__MAX_CLIENTS=500 agora
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(about = "Realtime WebSocket fan-out server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host address to bind the server to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port number to bind the server to
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration, command line wins
    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!("Starting Agora server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
