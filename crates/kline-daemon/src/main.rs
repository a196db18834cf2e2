//! OHLCV collector - Entry Point
//!
//! Runs the scheduled collector, or a single ingestion cycle with `--once`.

use anyhow::Result;
use clap::Parser;
use kline_daemon::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use tracing::info;

/// Scheduled OHLCV and price collector
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via KLINE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Run one ingestion cycle, print statistics and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    kline_telemetry::init_logging()?;

    info!("Starting kline collector v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > KLINE_CONFIG env var > default
    let explicit = args.config.or_else(|| std::env::var(CONFIG_ENV).ok());
    let config = match &explicit {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            kline_daemon::AppConfig::from_file(path)?
        }
        None => kline_daemon::AppConfig::load(DEFAULT_CONFIG_PATH)?,
    };
    info!(
        symbols = ?config.symbols,
        timeframes = ?config.timeframes,
        backend = ?config.storage.backend,
        "Configuration loaded"
    );

    let app = kline_daemon::Application::new(config)?;
    app.run_preflight().await?;

    if args.once {
        let cycle = app.run_once().await;
        info!(
            cycle = cycle.cycle,
            records = cycle.total_records,
            errors = cycle.total_errors,
            duration_secs = cycle.duration_secs,
            "Single cycle finished"
        );
        let snapshot = app.engine().statistics().snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    app.run().await?;

    Ok(())
}
