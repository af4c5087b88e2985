//! BTC 15-minute Polymarket flip bot entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_flip::api::{create_router, AppState};
use polymarket_flip::config::Config;
use polymarket_flip::engine::{EngineParams, SignalEngine};
use polymarket_flip::feed::{ClobPriceFeed, ReplayFeed};
use polymarket_flip::ledger::{JsonlStore, PositionLedger, StateSnapshot};
use polymarket_flip::market::{discover_active_market, fetch_market_from_slug, Market, PolymarketClient};
use polymarket_flip::metrics;
use polymarket_flip::runtime::{Scheduler, StopReason, Trader};
use polymarket_flip::signing::{address_from_private_key, WalletKind};
use polymarket_flip::trading::{ClobSink, OrderSink, PaperSink};
use polymarket_flip::utils::{shutdown_channel, spawn_shutdown_listener};

/// BTC 15-minute Polymarket reversal bot.
#[derive(Parser, Debug)]
#[command(name = "polymarket-flip")]
#[command(about = "Enters BTC 15-minute markets on rebounds and flips sides on reversals")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop (default).
    Run {
        /// Override DRY_RUN.
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health, status and metrics.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Check wallet address and USDC balance.
    CheckBalance,

    /// Discover the current active BTC 15min market.
    DiscoverMarket,

    /// Print statistics of the trade ledger.
    Stats,

    /// Replay a JSONL file of recorded quotes through a paper trader.
    Replay {
        file: PathBuf,

        /// Append replayed trades to this ledger instead of keeping them in memory.
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("polymarket_flip=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::CheckBalance) => cmd_check_balance().await,
        Some(Command::DiscoverMarket) => cmd_discover_market().await,
        Some(Command::Stats) => cmd_stats(),
        Some(Command::Replay { file, ledger }) => cmd_replay(file, ledger).await,
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(None, None).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    Ok(config)
}

fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BTC 15M FLIP BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed"));
    }
    println!("OK");

    if !config.polymarket_private_key.is_empty() {
        print!("Checking private key... ");
        match address_from_private_key(&config.polymarket_private_key) {
            Ok(addr) => {
                println!("OK");
                println!("  Wallet address: {}", addr);
            }
            Err(e) => {
                println!("FAILED");
                println!("  Error: {}", e);
                return Err(anyhow::anyhow!("Private key invalid"));
            }
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    if let Ok(wallet) = WalletKind::try_from(config.polymarket_signature_type) {
        println!("  Wallet: {}", wallet);
    }
    println!("  Position value: ${} (order ${})", config.position_value_usdc, config.order_value_usdc());
    println!("  Entry rebound: {}% off the low", config.entry_threshold_percent);
    println!("  Entry price threshold: ${}", config.entry_price_threshold);
    println!("  Exit reversal: {}% off the high", config.exit_reversal_percent);
    println!("  Boundary policy: {}", config.boundary_policy);
    println!("  Check interval: {}s", config.check_interval_seconds);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Ledger: {}", config.ledger_path);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

async fn cmd_check_balance() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BTC 15M FLIP BOT - BALANCE CHECK");
    println!("======================================================================");

    let config = load_config()?;
    let client = PolymarketClient::new(&config)?;
    println!("Host: {}", client.clob_url());

    print!("\n1. Getting wallet address... ");
    let address = client.get_address()?;
    println!("OK");
    println!("   Address: {}", address);

    print!("\n2. Getting USDC balance... ");
    match client.get_balance().await {
        Ok(balance) => {
            println!("OK");
            println!("   USDC Balance: ${:.6}", balance);
        }
        Err(e) => {
            println!("FAILED");
            println!("   Error: {}", e);
        }
    }

    println!("\n======================================================================");
    Ok(())
}

async fn cmd_discover_market() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BTC 15M FLIP BOT - MARKET DISCOVERY");
    println!("======================================================================");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    println!("\nSearching for active BTC 15min market...\n");

    match discover_active_market(&http_client).await {
        Ok(market) => {
            println!("MARKET FOUND");
            println!("----------------------------------------------------------------------");
            println!("  Slug: {}", market.slug);
            println!("  ID: {}", market.id);
            println!("  UP Token: {}", market.up_token_id);
            println!("  DOWN Token: {}", market.down_token_id);
            println!("  Time Remaining: {}", market.time_remaining_str());
            if let Some(q) = &market.question {
                println!("  Question: {}", q);
            }
        }
        Err(e) => {
            println!("NO ACTIVE MARKET FOUND");
            println!("  Error: {}", e);
            println!("\nMarkets open every 15 minutes. Try again shortly.");
        }
    }
    println!("======================================================================");

    Ok(())
}

fn cmd_stats() -> anyhow::Result<()> {
    let config = load_config()?;
    let ledger = PositionLedger::open(JsonlStore::new(&config.ledger_path))?;
    let stats = ledger.stats();

    println!("======================================================================");
    println!("BTC 15M FLIP BOT - LEDGER STATISTICS");
    println!("======================================================================");
    println!("  Ledger:          {}", config.ledger_path);
    println!("  Total trades:    {}", stats.total_trades);
    println!("  Winning trades:  {}", stats.winning_trades);
    println!("  Losing trades:   {}", stats.losing_trades);
    println!("  Win rate:        {}%", stats.win_rate);
    println!("  Total P&L:       ${}", stats.total_pnl.round_dp(4));
    println!("  Average P&L:     ${}", stats.average_pnl.round_dp(4));
    println!("----------------------------------------------------------------------");
    for record in ledger.records().iter().rev().take(10) {
        println!(
            "  {} {:<4} {} -> {}  pnl ${}  ({}, {})",
            record.exit_time.date(),
            record.side,
            record.entry_price,
            record.exit_price,
            record.realized_pnl.round_dp(4),
            record.reason,
            record.market_slug
        );
    }

    match StateSnapshot::load(&config.state_path)? {
        Some(snapshot) => match snapshot.position.open() {
            Some(pos) => println!(
                "  Open position: {} {} shares @ ${} ({})",
                pos.side, pos.shares, pos.entry_price, pos.market_slug
            ),
            None => println!("  Open position: none"),
        },
        None => println!("  No saved state at {}", config.state_path),
    }
    println!("======================================================================");

    Ok(())
}

/// Replay recorded events through a paper trader, in file order.
async fn cmd_replay(file: PathBuf, ledger_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = load_config()?;
    config.dry_run = true;
    config.validate()?;

    let feed = ReplayFeed::from_path(&file)?;
    let ledger = match &ledger_path {
        Some(path) => PositionLedger::open(JsonlStore::new(path))?,
        None => PositionLedger::in_memory(),
    };
    let mut trader = Trader::new(
        SignalEngine::new(EngineParams::from_config(&config)),
        ledger,
        Box::new(PaperSink::new(config.sim_balance)),
        &config,
    );

    let mut failures = 0usize;
    for event in feed.into_events() {
        if let Err(e) = trader.handle(event).await {
            failures += 1;
            warn!(error = %e, "replayed event failed");
        }
    }

    let stats = trader.ledger().stats();
    info!("========================================");
    info!("REPLAY COMPLETE: {}", file.display());
    info!("========================================");
    info!("Trades:               {}", stats.total_trades);
    info!("Win rate:             {}%", stats.win_rate);
    info!("Realized P&L:         ${}", stats.total_pnl.round_dp(4));
    info!("Unrealized P&L:       ${}", trader.engine().unrealized_pnl().round_dp(4));
    if let Some(balance) = trader.balance() {
        info!("Sim balance:          ${} (start ${})", balance.round_dp(4), config.sim_balance);
    }
    info!("Failed events:        {}", failures);
    info!("========================================");

    Ok(())
}

/// Sleep for `duration`; returns false if shutdown was requested meanwhile.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}

async fn next_market(http: &reqwest::Client, config: &Config) -> anyhow::Result<Market> {
    let market = match &config.polymarket_market_slug {
        Some(slug) => fetch_market_from_slug(http, slug).await?,
        None => discover_active_market(http).await?,
    };
    Ok(market)
}

async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = load_config()?;
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    let mode = if config.dry_run { "SIMULATION" } else { "LIVE TRADING" };
    info!("Configuration loaded successfully");
    info!("Mode: {}", mode);
    info!("Position value: ${}", config.order_value_usdc());
    info!(
        "Entry: +{}% off low or <= ${}, exit: -{}% off high, boundary: {}",
        config.entry_threshold_percent,
        config.entry_price_threshold,
        config.exit_reversal_percent,
        config.boundary_policy
    );

    let prometheus = metrics::install_recorder()?;
    let app_state = AppState::new().with_metrics(prometheus);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    spawn_shutdown_listener(shutdown_tx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    let router = create_router(app_state.clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let ledger = PositionLedger::open(JsonlStore::new(&config.ledger_path))?;
    info!(
        trades = ledger.records().len(),
        cumulative_pnl = %ledger.cumulative_pnl(),
        "ledger loaded"
    );

    let params = EngineParams::from_config(&config);
    let engine = match StateSnapshot::load(&config.state_path)? {
        Some(snapshot) => {
            info!(position = ?snapshot.position, saved_at = %snapshot.saved_at, "restoring saved state");
            SignalEngine::restore(params, snapshot.position, snapshot.binding)
        }
        None => SignalEngine::new(params),
    };

    let client = PolymarketClient::new(&config)?;
    let http_client = client.http().clone();
    let sink: Box<dyn OrderSink> = if config.dry_run {
        Box::new(PaperSink::new(config.sim_balance))
    } else {
        Box::new(ClobSink::new(client.clone(), &config))
    };

    let trader = Trader::new(engine, ledger, sink, &config)
        .with_status(app_state.clone())
        .with_shutdown(shutdown_rx.clone());
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let trader_handle = tokio::spawn(trader.run(rx));

    let mut scheduler = Scheduler::new(
        ClobPriceFeed::new(client),
        Duration::from_secs(config.check_interval_seconds),
        tx,
        shutdown_rx.clone(),
    );
    let mut shutdown = shutdown_rx;

    info!("Starting flip bot...");
    while !scheduler.is_shutting_down() {
        info!("Searching for active BTC 15min market...");
        let market = match next_market(&http_client, &config).await {
            Ok(m) => m,
            Err(e) => {
                warn!("No active market found: {}. Retrying in 30s...", e);
                if !pause(&mut shutdown, Duration::from_secs(30)).await {
                    break;
                }
                continue;
            }
        };

        info!("========================================");
        info!("MARKET ATTACHED");
        info!("========================================");
        info!("Market: {}", market.slug);
        info!("UP Token: {}", market.up_token_id);
        info!("DOWN Token: {}", market.down_token_id);
        info!("Time remaining: {}", market.time_remaining_str());
        info!("Mode: {}", mode);
        info!("========================================");

        match scheduler.run_market(&market).await {
            StopReason::Shutdown => break,
            StopReason::TraderGone => {
                error!("Trader task stopped unexpectedly");
                break;
            }
            reason => {
                info!(%reason, "Market {} finished, searching for next market in 10s...", market.slug);
                if !pause(&mut shutdown, Duration::from_secs(10)).await {
                    break;
                }
            }
        }
    }

    info!("Shutting down...");
    drop(scheduler);
    let mut trader = trader_handle.await?;
    trader.shutdown(&config.state_path)?;
    server_handle.abort();

    Ok(())
}
