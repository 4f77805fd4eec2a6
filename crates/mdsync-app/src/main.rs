//! Live market data sync engine - smoke runner.
//!
//! Starts the engine, watches the configured instruments, and logs
//! quote updates until interrupted. The real consumer is the dashboard
//! host embedding `LiveDataEngine` as a library.

use anyhow::Result;
use clap::Parser;
use mdsync_core::{SubMode, SymbolKey};
use mdsync_feed::QuoteListener;
use std::sync::Arc;
use tracing::{info, warn};

/// Live market data synchronization engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MDSYNC_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    mdsync_ws::init_crypto();

    let args = Args::parse();

    mdsync_telemetry::init_logging()?;

    info!("Starting mdsync v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            mdsync_app::AppConfig::from_file(&path)?
        }
        None => mdsync_app::AppConfig::load()?,
    };

    let engine = mdsync_app::LiveDataEngine::start(config.clone()).await?;

    let mut subscriptions = Vec::new();
    for entry in &config.watchlist {
        match entry.parse::<SymbolKey>() {
            Ok(key) => {
                let listener: QuoteListener = Arc::new(|snap| {
                    info!(
                        symbol = %snap.key,
                        ltp = ?snap.fields.ltp.map(|p| p.to_string()),
                        "Quote update"
                    );
                });
                subscriptions.push(
                    engine
                        .watch_quotes(&key.symbol, key.exchange, SubMode::Quote, listener)
                        .await,
                );
            }
            Err(e) => warn!(entry = %entry, error = %e, "Skipping invalid watchlist entry"),
        }
    }

    info!(watched = subscriptions.len(), "Engine running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    drop(subscriptions);
    engine.shutdown();

    Ok(())
}
