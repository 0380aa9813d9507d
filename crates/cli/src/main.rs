use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use boxarb_engine::config::TradingMode;
use boxarb_engine::scanner::{BoxScanner, MarketWindow, ScannerConfig};
use boxarb_engine::{BookClient, Config, PaperOrderManager, TimeInForce, TradeLedger};

#[derive(Parser)]
#[command(name = "boxarb")]
#[command(about = "Box-arbitrage scanner for binary prediction markets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one market window and trade the box when it appears
    Run {
        /// Market slug, used in logs (e.g. "btc-updown-15m")
        #[arg(long)]
        market: String,
        /// Short asset tag for cycle ids (e.g. "BTC")
        #[arg(long)]
        asset: String,
        /// Window expiry in ISO 8601 (e.g. "2026-08-26T15:00:00Z")
        #[arg(long)]
        expiry: String,
        /// Session name; defaults to "<asset>-<date>"
        #[arg(long)]
        session: Option<String>,
        /// Minimum edge override (e.g. 0.005)
        #[arg(long)]
        edge: Option<Decimal>,
        /// Target spend per attempt in dollars
        #[arg(long)]
        usd: Option<Decimal>,
        /// Book poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop scanning this many seconds before expiry
        #[arg(long)]
        stop_seconds: Option<u64>,
        /// Placement policy: FOK, FAK, GTC or GTD
        #[arg(long)]
        order_type: Option<TimeInForce>,
        /// Trade with real money through the signed venue client
        #[arg(long)]
        live: bool,
    },
    /// Summarize a saved session ledger file
    Report {
        /// Path to a session_<name>.json file
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run {
            market,
            asset,
            expiry,
            session,
            edge,
            usd,
            interval_ms,
            stop_seconds,
            order_type,
            live,
        } => {
            let overrides = Overrides {
                edge,
                usd,
                interval_ms,
                stop_seconds,
                order_type,
                live,
            };
            run_scan(&market, &asset, &expiry, session.as_deref(), overrides).await?;
        }
        Commands::Report { file } => {
            run_report(&file)?;
        }
    }

    Ok(())
}

/// Command-line overrides applied on top of the environment config.
struct Overrides {
    edge: Option<Decimal>,
    usd: Option<Decimal>,
    interval_ms: Option<u64>,
    stop_seconds: Option<u64>,
    order_type: Option<TimeInForce>,
    live: bool,
}

async fn run_scan(
    market: &str,
    asset: &str,
    expiry: &str,
    session: Option<&str>,
    overrides: Overrides,
) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("loading configuration from environment")?;
    if let Some(edge) = overrides.edge {
        config.min_edge = edge;
    }
    if let Some(usd) = overrides.usd {
        config.usd_per_attempt = usd;
    }
    if let Some(ms) = overrides.interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = overrides.stop_seconds {
        config.stop_buffer = Duration::from_secs(secs);
    }
    if let Some(tif) = overrides.order_type {
        config.tif = tif;
    }
    if overrides.live {
        config.mode = TradingMode::Live;
        anyhow::ensure!(
            config.credentials.is_some(),
            "live mode requires POLYMARKET_PRIVATE_KEY, POLYMARKET_API_KEY, \
             POLYMARKET_API_SECRET and POLYMARKET_API_PASSPHRASE"
        );
    }

    let expiry: DateTime<Utc> = expiry
        .parse()
        .with_context(|| format!("parsing expiry timestamp: {expiry}"))?;
    anyhow::ensure!(expiry > Utc::now(), "expiry {} is in the past", expiry);

    if config.mode == TradingMode::Live {
        // Credentials were validated by Config::from_env; the signed client
        // itself is supplied by the embedding application.
        anyhow::bail!(
            "live mode requires a signed venue client; embed boxarb_engine::LiveOrderManager \
             with your VenueClient implementation, or set TRADING_MODE=paper"
        );
    }

    let session_name = session
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}", asset.to_lowercase(), Utc::now().format("%Y%m%d")));
    let ledger = TradeLedger::load_or_new(&config.log_dir, &session_name)
        .context("opening session ledger")?
        .with_stopped_loss_factor(config.stopped_loss_factor);
    let ledger = Arc::new(Mutex::new(ledger));

    let client = BookClient::with_base_url(&config.clob_host);
    let manager = Arc::new(PaperOrderManager::new(
        client,
        &config.up_token_id,
        &config.down_token_id,
    ));

    let window = MarketWindow {
        market_slug: market.to_string(),
        asset: asset.to_string(),
        up_token_id: config.up_token_id.clone(),
        down_token_id: config.down_token_id.clone(),
        expiry,
    };
    let scanner_config = ScannerConfig {
        min_edge: config.min_edge,
        usd_per_attempt: config.usd_per_attempt,
        poll_interval: config.poll_interval,
        stop_buffer: config.stop_buffer,
        tif: config.tif,
    };

    tracing::info!(
        market = %market,
        session = %session_name,
        mode = ?config.mode,
        "Starting box-arbitrage scan"
    );
    let scanner = BoxScanner::new(manager, Arc::clone(&ledger), window, scanner_config);
    let summary = scanner.run().await?;

    let mut ledger = ledger.lock();
    ledger.end_session().context("finalizing session ledger")?;
    let stats = ledger.stats();

    println!("Scan finished: {market}");
    println!(
        "  attempts: {}  submissions: {}  locked boxes: {}",
        summary.attempts, summary.submissions, summary.locked
    );
    print_stats(&stats);
    println!("  ledger: {}", ledger.path().display());
    Ok(())
}

fn run_report(file: &str) -> anyhow::Result<()> {
    let stats =
        TradeLedger::read_stats(file).with_context(|| format!("reading session file: {file}"))?;

    println!("Session report: {file}");
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &boxarb_engine::SessionStats) {
    println!(
        "  trades: {}  cycles: {} ({} completed: {} locked, {} stopped; {} expired)",
        stats.total_trades,
        stats.total_cycles,
        stats.completed_cycles,
        stats.locked_cycles,
        stats.stopped_cycles,
        stats.expired_cycles
    );
    println!(
        "  gross profit: {}  gross loss: {}  net pnl: {}",
        stats.gross_profit, stats.gross_loss, stats.net_pnl
    );
    println!(
        "  win rate: {:.1}%  avg/cycle: {}  duration: {:.2}h",
        stats.win_rate * 100.0,
        stats.avg_profit_per_cycle,
        stats.duration_hours
    );
}
