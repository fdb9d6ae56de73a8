//! Palisade trading runner - entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

/// Risk-gated bar-to-order trading runner.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PALISADE_CONFIG).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deterministic historical replay over the configured CSV data.
    Backtest,
    /// Paper session: the live pipeline against the in-memory paper venue.
    Paper,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    palisade_telemetry::init_logging()?;
    info!("starting palisade-trader v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("PALISADE_CONFIG").ok())
        .unwrap_or_else(|| "config/palisade.toml".to_string());
    info!(config_path = %config_path, "loading configuration");

    let config = palisade_trader::AppConfig::load(&config_path)?;
    let app = palisade_trader::Application::new(config)?;

    match args.command {
        Command::Backtest => {
            let report = app.run_backtest().await?;
            println!(
                "final equity: {:.2}  return: {:.2}%  max drawdown: {:.2}%  \
                 fills: {}  rejections: {}",
                report.final_equity,
                report.total_return * 100.0,
                report.max_drawdown * 100.0,
                report.fills,
                report.rejections,
            );
            if let Some(reason) = report.halted {
                println!("replay halted early: {reason}");
            }
        }
        Command::Paper => {
            let summary = app.run_paper().await?;
            println!(
                "bars: {}  signals: {}  orders: {}  fills: {}  rejections: {}",
                summary.bars_processed,
                summary.signals,
                summary.orders_submitted,
                summary.fills,
                summary.rejections,
            );
            if let Some(reason) = summary.halted {
                println!("session halted: {reason}");
            }
        }
    }

    Ok(())
}
