//! # Cadence
//!
//! Command-line client for the Cadence presence channel and offline
//! request layer.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! cadence
//!
//! # Run with a specific config file
//! CADENCE_CONFIG=/path/to/cadence.toml cadence
//!
//! # Point at another origin
//! CADENCE_ORIGIN=https://learn.example.com cadence
//! ```
//!
//! Commands are read line by line from stdin; `help` lists them.

mod commands;
mod config;
mod metrics;
mod probe;
mod runtime;

use anyhow::Result;
use commands::Command;
use runtime::{Reply, Runtime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Cadence client for {}", config.origin);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::warn!(error = %e, "Metrics exporter not started");
        }
    }

    let mut runtime = Runtime::from_config(config)?;
    runtime.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(command) => match runtime.handle(command).await {
                Reply::Output(text) => println!("{text}"),
                Reply::Quit => break,
            },
            Err(e) => println!("{e}"),
        }
    }

    runtime.shutdown().await;
    Ok(())
}
