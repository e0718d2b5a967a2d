use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use market_screener::catalog::Catalog;
use market_screener::comfy_table;
use market_screener::providers::snapshot::{self, SnapshotProvider};
use market_screener::providers::{ExchangeRouter, HttpSettings, MarketDataProvider};
use market_screener::storage_utils::{AppConfig, AsyncStorageManager};
use market_screener::tools::{self, ToolRequest};
use market_screener::{Engine, Timeframe, tui};

#[derive(Parser)]
#[command(name = "market-screener")]
#[command(about = "Crypto market screens and candle-pattern scans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Serve market data from the stored snapshot instead of the exchanges
    #[arg(long, global = true)]
    offline: bool,

    /// Storage directory (defaults to `storage/` next to the executable)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every tool once with the demonstration arguments
    Demo,

    /// Dispatch one JSON request, e.g. '{"tool": "top_gainers", "limit": 5}'
    Call { request: String },

    /// Capture a snapshot of an exchange into storage
    Fetch {
        #[arg(long, default_value = "KUCOIN")]
        exchange: String,

        /// Repeat for several timeframes
        #[arg(long = "timeframe", default_values = ["15m", "1h", "4h"])]
        timeframes: Vec<Timeframe>,
    },

    /// Interactive dashboard over the screens
    Tui,
}

async fn open_storage(dir: Option<PathBuf>) -> Result<AsyncStorageManager> {
    match dir {
        Some(dir) => AsyncStorageManager::new(dir).await,
        None => AsyncStorageManager::new_relative("storage").await,
    }
}

async fn build_engine(storage: &AsyncStorageManager, config: &AppConfig, offline: bool) -> Result<Engine> {
    let catalog = Catalog::load(storage).await?;
    let provider: Arc<dyn MarketDataProvider> = if offline {
        let snapshot = SnapshotProvider::load(storage)
            .await
            .context("no usable klines.json in storage; run `fetch` first")?;
        Arc::new(snapshot)
    } else {
        Arc::new(ExchangeRouter::live(&HttpSettings::from_config(config))?)
    };
    Ok(Engine::new(provider, Arc::new(catalog), config.engine_config()))
}

async fn run_demo(engine: &Engine) {
    println!("\n--- Market screener: tool demonstration ---");
    for request in ToolRequest::demo_suite() {
        let name = request.name();
        println!("\n--- {name} ---");
        match tools::dispatch(engine, request).await {
            Ok(response) => println!("{}", comfy_table::render(name, &response)),
            Err(e) => println!("Error: {e}"),
        }
    }
}

async fn run_fetch(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    exchange: &str,
    timeframes: &[Timeframe],
) -> Result<()> {
    let router = ExchangeRouter::live(&HttpSettings::from_config(config))?;
    let captured = snapshot::capture(
        &router,
        exchange,
        timeframes,
        config.klines.lookback as usize,
        config.scan.concurrency,
        Duration::from_secs(1),
    )
    .await?;
    println!("Captured {} series from {exchange}", captured.len());

    // the full listing, not the capped universe that was captured
    match router.market_count(exchange).await {
        Ok(listed) => {
            let catalog = Catalog::load(storage).await?.with_market_count(exchange, listed);
            catalog.save(storage).await?;
        }
        Err(e) => warn!(exchange, error = %e, "keeping the stored market count"),
    }

    let mut stored = if storage.exists(snapshot::SNAPSHOT_FILE).await {
        SnapshotProvider::load(storage).await?
    } else {
        SnapshotProvider::new()
    };
    stored.merge(captured);
    stored.save(storage).await?;
    info!(series = stored.len(), "snapshot saved");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Demo);

    // The dashboard owns the terminal, so it runs without a log subscriber.
    if !matches!(command, Commands::Tui) {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(cli.log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let storage = open_storage(cli.storage).await?;
    let config = AppConfig::load_or_default(&storage).await?;

    match command {
        Commands::Demo => {
            let engine = build_engine(&storage, &config, cli.offline).await?;
            run_demo(&engine).await;
        }
        Commands::Call { request } => {
            let engine = build_engine(&storage, &config, cli.offline).await?;
            let outcome = match ToolRequest::from_json(&request) {
                Ok(request) => tools::dispatch(&engine, request).await,
                Err(e) => Err(e),
            };
            println!("{}", tools::to_json(&outcome)?);
            if outcome.is_err() {
                std::process::exit(1);
            }
        }
        Commands::Fetch { exchange, timeframes } => {
            run_fetch(&storage, &config, &exchange.to_ascii_uppercase(), &timeframes).await?;
        }
        Commands::Tui => {
            let engine = build_engine(&storage, &config, cli.offline).await?;
            tui::run_tui(Arc::new(engine)).await?;
        }
    }

    Ok(())
}
