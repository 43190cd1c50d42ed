//! Multi-account trading decision engine
//!
//! Turns price forecasts into SELL/HOLD/BUY decisions for several accounts
//! trading the same market, sizes each trade under a per-account risk budget,
//! halts accounts on drawdown and allocates capital by maximizing the Sharpe
//! ratio under a volatility ceiling.

mod config;
mod error;
mod indicators;
mod journal;
mod models;
mod portfolio;
mod predictor;
mod risk;
mod trading;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::EngineConfig;
use crate::indicators::TechnicalIndicators;
use crate::journal::{JsonJournal, MemoryJournal, PerformanceJournal};
use crate::models::{AccountId, MarketFeed, MarketStep, PairTicker};
use crate::portfolio::{AssetUniverse, PortfolioOptimizer};
use crate::predictor::{MomentumPredictor, Predictor, ReplayPredictor};
use crate::risk::RiskManager;
use crate::trading::{PairSelector, Session, TradingEnvironment};

/// Forecast-driven multi-account trading engine CLI.
#[derive(Parser)]
#[command(name = "matrader")]
#[command(about = "Simulate forecast-driven trading across several risk-managed accounts", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); built-in defaults when omitted
    #[arg(short, long, env = "MATRADER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trading episodes over a recorded market feed
    Simulate {
        /// Market bars (JSON array of {timestamp, open, high, low, close, volume})
        #[arg(short, long)]
        market: PathBuf,

        /// Forecast series (JSON array of prices, one per step); momentum
        /// extrapolation when omitted
        #[arg(short, long)]
        forecasts: Option<PathBuf>,

        /// Asset universe for rebalancing (JSON object of name -> closes)
        #[arg(short, long)]
        universe: Option<PathBuf>,

        /// Append performance records to this JSON file
        #[arg(short, long)]
        journal: Option<PathBuf>,

        /// Number of episodes; net worth compounds across them
        #[arg(short, long, default_value = "1")]
        episodes: u32,
    },

    /// Compute one account's Sharpe-optimal allocation
    Optimize {
        /// Asset universe (JSON object of name -> closes)
        #[arg(short, long)]
        universe: PathBuf,

        /// Account whose risk budget sets the volatility ceiling
        #[arg(short, long)]
        account: String,

        /// Balance to size the ceiling for (defaults to the initial balance)
        #[arg(short, long)]
        balance: Option<Decimal>,
    },

    /// Rank tradable pairs by volatility and volume
    SelectPairs {
        /// 24h tickers (JSON array of {symbol, high, low, quote_volume})
        #[arg(short, long)]
        tickers: PathBuf,

        /// Quote currency
        #[arg(short, long, default_value = "EUR")]
        quote: String,

        /// Number of pairs to keep
        #[arg(long, default_value = "5")]
        top: usize,

        /// Minimum (high - low) / low
        #[arg(long, default_value = "0.02")]
        min_volatility: Decimal,

        /// Minimum quote volume
        #[arg(long, default_value = "100000")]
        min_volume: Decimal,

        /// Pairs returned when nothing qualifies
        #[arg(long, value_delimiter = ',', default_value = "BTC/EUR,ETH/EUR")]
        fallback: Vec<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            market,
            forecasts,
            universe,
            journal,
            episodes,
        } => {
            let bars: Vec<MarketStep> = read_json(&market)?;
            let feed = MarketFeed::new(bars).context("Invalid market feed")?;

            let env = TradingEnvironment::new(
                feed,
                config.account_profiles(),
                config.fee_rate,
                Box::new(TechnicalIndicators::scalping()?),
            )?;

            let predictor: Box<dyn Predictor> = match forecasts {
                Some(path) => {
                    let replay = ReplayPredictor::new(read_json(&path)?);
                    info!(forecasts = replay.len(), "Replaying forecasts");
                    Box::new(replay)
                }
                None => {
                    info!("No forecasts given, using momentum extrapolation");
                    Box::new(MomentumPredictor::default())
                }
            };

            let journal: Box<dyn PerformanceJournal> = match journal {
                Some(path) => {
                    let journal = JsonJournal::open(&path)?;
                    info!(
                        path = %journal.path().display(),
                        existing = journal.records().len(),
                        "Journaling performance records"
                    );
                    Box::new(journal)
                }
                None => Box::new(MemoryJournal::new()),
            };

            let mut session = Session::new(env, predictor, journal, config.session_settings());
            if let Some(path) = universe {
                let universe: AssetUniverse = read_json(&path)?;
                session = session.with_universe(universe);
            }

            // Register shutdown handler
            let shutdown = session.shutdown_signal();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            });

            let summaries = session.run(episodes).await?;
            for summary in &summaries {
                println!("{}", summary);
            }
            println!("Journal: {} records", session.journal().records().len());
        }

        Commands::Optimize {
            universe,
            account,
            balance,
        } => {
            let id = AccountId::new(account)?;
            let account = config
                .account(&id)
                .with_context(|| format!("Account {} is not configured", id))?;
            let risk = RiskManager::new(account.risk.clone())?;
            let balance = balance.unwrap_or(account.risk.initial_balance);

            let universe: AssetUniverse = read_json(&universe)?;
            let (returns, cov) = universe.moments();
            let optimizer =
                PortfolioOptimizer::for_account(returns, cov, config.risk_free_rate, &risk, balance)?;
            let weights = optimizer.optimize();

            println!("\nAllocation for {} (balance ${:.2}, ceiling {:.4})", id, balance, optimizer.max_allowed_risk());
            println!("{:<16} {:>10}", "ASSET", "WEIGHT");
            println!("{}", "-".repeat(27));
            for (name, w) in universe.names().iter().zip(weights.as_slice()) {
                println!("{:<16} {:>9.2}%", truncate(name, 16), w * 100.0);
            }
        }

        Commands::SelectPairs {
            tickers,
            quote,
            top,
            min_volatility,
            min_volume,
            fallback,
        } => {
            let tickers: Vec<PairTicker> = read_json(&tickers)?;
            let selector = PairSelector {
                top_n: top,
                volatility_threshold: min_volatility,
                min_volume,
                quote,
            };

            for symbol in selector.select(&tickers, &fallback) {
                println!("{}", symbol);
            }
        }

        Commands::Config => {
            println!("\n=== Engine Configuration ===\n");
            println!("Execution:");
            println!("  Fee Rate:             {}%", config.fee_rate * dec!(100));
            println!("  Risk-Free Rate:       {}", config.risk_free_rate);
            println!("  Risk Window:          {} bars", config.risk_window);
            match config.rebalance_every {
                Some(n) => println!("  Rebalance Every:      {} steps", n),
                None => println!("  Rebalance Every:      disabled"),
            }
            println!("  Loss Cutoff:          {}%", config.loss_cutoff * dec!(100));
            println!("  Reduced Max Risk:     {}%", config.reduced_max_risk * dec!(100));
            println!("  Resume Halted:        {}", config.resume_halted);

            for account in &config.accounts {
                let r = &account.risk;
                println!("\nAccount {}:", account.id);
                println!("  Initial Balance:      ${}", r.initial_balance);
                println!("  Max Risk:             {}%", r.max_risk * dec!(100));
                println!("  Max Drawdown:         {}%", r.max_drawdown * dec!(100));
                println!("  Trailing Stop:        {}%", r.trailing_stop_pct * dec!(100));
                println!("  Scalping Mode:        {}", r.scalping_mode);
            }
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
