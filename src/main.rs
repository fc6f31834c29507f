use accubot::api::{BinanceClient, PaperGateway};
use accubot::config::BotConfig;
use accubot::execution::{ClockSync, TradingEngine};
use accubot::ExchangeGateway;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "accubot", about = "Spot accumulation bot", version)]
struct Args {
    /// TOML config file (defaults to ./accubot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trading pair, e.g. DOGEUSDT
    #[arg(short, long)]
    symbol: Option<String>,

    /// Seconds between cycles
    #[arg(short, long)]
    interval: Option<u64>,

    /// Read live data but fill orders locally
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = load_config(&args)?;

    tracing::info!(
        symbol = %config.symbol,
        base = %config.base_asset,
        quote = %config.quote_asset,
        risk_tolerance = %config.risk_tolerance,
        dry_run = config.dry_run,
        "🚀 AccuBot starting"
    );

    let clock = Arc::new(ClockSync::new());
    let client = BinanceClient::new(config.binance_config(), clock.clone())
        .context("failed to build exchange client")?;

    if config.dry_run {
        run(Arc::new(PaperGateway::new(client)), clock, &config).await
    } else {
        run(Arc::new(client), clock, &config).await
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("accubot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<BotConfig> {
    let mut config =
        BotConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(symbol) = &args.symbol {
        config.symbol = symbol.clone();
        // Assets belong to the old symbol
        config.base_asset.clear();
        config.quote_asset.clear();
        config.normalize()?;
    }
    if let Some(interval) = args.interval {
        config.cycle_interval_secs = interval;
    }
    if args.dry_run {
        config.dry_run = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run<G>(gateway: Arc<G>, clock: Arc<ClockSync>, config: &BotConfig) -> anyhow::Result<()>
where
    G: ExchangeGateway + 'static,
{
    let engine = TradingEngine::new(gateway, clock, config.engine_settings());
    engine
        .start()
        .await
        .with_context(|| format!("failed to start engine for {}", config.symbol))?;

    tracing::info!("Press Ctrl+C to stop...");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    engine.stop().await;
    engine.join().await;

    let status = engine.status().await;
    tracing::info!(
        cycles = status.cycles_run,
        orders = status.orders_submitted,
        "👋 AccuBot stopped"
    );
    Ok(())
}
