//! Bybit moving-average crossover bot
//!
//! Derives a Long/Short signal from a fast/slow average crossover on closed
//! bars, reconciles it against the live position, and places the resulting
//! close/cancel/open orders. Trades and failures are reported to Telegram.

mod api;
mod bot;
mod db;
mod error;
mod indicators;
mod models;
mod paper;
mod trading;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{BybitClient, Credentials, Exchange, Notifier};
use crate::bot::{Bot, BotConfig, Schedule};
use crate::db::Database;
use crate::indicators::MovingAverage;
use crate::models::KlineInterval;
use crate::paper::{PaperConfig, PaperExchange};
use crate::trading::{
    CrossoverMode, ExecutorConfig, FlatSignalPolicy, ReconcilePolicy, ReentryPolicy, RiskParams,
    SameDirectionPolicy, SignalConfig, SignalEngine,
};

/// Moving-average crossover bot CLI.
#[derive(Parser)]
#[command(name = "crossbot")]
#[command(about = "Trade a moving-average crossover on Bybit linear perpetuals", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, env = "CROSSBOT_DATABASE", default_value = "sqlite:./crossbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Use the Bybit testnet
    #[arg(long, global = true, env = "BYBIT_TESTNET")]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot loop
    Run(RunArgs),

    /// Run a single tick for every symbol and exit
    Once(RunArgs),

    /// Show the current crossover signal without trading
    Signal {
        #[command(flatten)]
        market: MarketArgs,

        #[command(flatten)]
        signal: SignalArgs,
    },

    /// Show live positions (requires API credentials)
    Position {
        #[command(flatten)]
        market: MarketArgs,
    },

    /// Show the resolved configuration
    Config(RunArgs),

    /// Show recent reconciliation journal entries
    History {
        /// Only this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Args, Debug, Clone)]
struct MarketArgs {
    /// Comma-separated instruments
    #[arg(long, env = "CROSSBOT_SYMBOLS", value_delimiter = ',', default_value = "SUIUSDT")]
    symbols: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct SignalArgs {
    /// Kline interval (1, 3, 5, 15, 30, 60, 120, 240, 360, 720, D, W)
    #[arg(long, env = "CROSSBOT_INTERVAL", default_value = "5")]
    interval: KlineInterval,

    /// Fast average period
    #[arg(long, default_value_t = 9)]
    fast: usize,

    /// Slow average period
    #[arg(long, default_value_t = 21)]
    slow: usize,

    #[arg(long, value_enum, default_value_t = MovingAverage::Simple)]
    average: MovingAverage,

    /// fade: fast below slow is long; follow: fast above slow is long
    #[arg(long, value_enum, default_value_t = CrossoverMode::Fade)]
    mode: CrossoverMode,

    /// Candles fetched per evaluation
    #[arg(long, default_value_t = 30)]
    lookback: u32,
}

impl SignalArgs {
    fn to_config(&self) -> SignalConfig {
        SignalConfig {
            interval: self.interval,
            fast_period: self.fast,
            slow_period: self.slow,
            average: self.average,
            mode: self.mode,
            lookback: self.lookback,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    market: MarketArgs,

    #[command(flatten)]
    signal: SignalArgs,

    /// Contracts per entry
    #[arg(short, long, env = "CROSSBOT_QTY", default_value = "10")]
    qty: Decimal,

    /// Leverage set on every symbol at startup
    #[arg(long, env = "CROSSBOT_LEVERAGE", default_value_t = 50)]
    leverage: u32,

    /// Take profit distance in percent of the signal bar close
    #[arg(long)]
    take_profit: Option<Decimal>,

    /// Stop loss distance in percent of the signal bar close
    #[arg(long)]
    stop_loss: Option<Decimal>,

    /// Largest position held per symbol, in contracts
    #[arg(long, default_value = "50")]
    max_position: Decimal,

    #[arg(long, value_enum, default_value_t = SameDirectionPolicy::Hold)]
    same_direction: SameDirectionPolicy,

    #[arg(long, value_enum, default_value_t = FlatSignalPolicy::Hold)]
    on_flat: FlatSignalPolicy,

    #[arg(long, value_enum, default_value_t = ReentryPolicy::Immediate)]
    reentry: ReentryPolicy,

    /// Tick on every Nth minute of the UTC day
    #[arg(long, default_value_t = 5)]
    align_minutes: u32,

    /// Tick every N seconds instead of on minute boundaries
    #[arg(long)]
    every_secs: Option<u64>,

    /// Only notify on trades and failures
    #[arg(long)]
    quiet: bool,

    /// Simulate orders against live market data
    #[arg(long)]
    dry_run: bool,

    /// Starting balance for dry runs
    #[arg(long, default_value = "10000")]
    paper_balance: Decimal,
}

impl RunArgs {
    fn to_config(&self) -> BotConfig {
        let pct = |p: Option<Decimal>| p.map(|v| v / Decimal::ONE_HUNDRED);

        BotConfig {
            symbols: self.market.symbols.iter().map(|s| s.trim().to_uppercase()).collect(),
            leverage: self.leverage,
            risk: RiskParams {
                order_quantity: self.qty,
                take_profit_pct: pct(self.take_profit),
                stop_loss_pct: pct(self.stop_loss),
                max_aggregate_position: self.max_position,
            },
            policy: ReconcilePolicy {
                same_direction: self.same_direction,
                on_flat_signal: self.on_flat,
                reentry: self.reentry,
            },
            signal: self.signal.to_config(),
            schedule: match self.every_secs {
                Some(secs) => Schedule::Every { secs },
                None => Schedule::Aligned {
                    minutes: self.align_minutes,
                },
            },
            executor: ExecutorConfig::default(),
            notify_indicators: !self.quiet,
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Live client when credentials are present and a dry run wasn't asked for,
/// otherwise a paper account fed by public market data.
fn build_exchange(args: &RunArgs, testnet: bool) -> Result<(Arc<dyn Exchange>, Option<Arc<PaperExchange>>)> {
    if !args.dry_run {
        match Credentials::from_env() {
            Ok(credentials) => {
                let client = BybitClient::new(BybitClient::base_url_for(testnet), Some(credentials))?;
                return Ok((Arc::new(client), None));
            }
            Err(e) => warn!(error = %e, "No API credentials, falling back to paper trading"),
        }
    }

    let market: Arc<dyn Exchange> = Arc::new(BybitClient::public(testnet)?);
    let paper = Arc::new(PaperExchange::new(
        PaperConfig {
            initial_balance: args.paper_balance,
            ..Default::default()
        },
        Some(market),
    ));
    Ok((paper.clone(), Some(paper)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => {
            let config = args.to_config();
            config.validate()?;

            let db = Database::new(&cli.database).await?;
            let (exchange, paper) = build_exchange(&args, cli.testnet)?;
            let notifier = Notifier::from_env()?;

            info!(
                exchange = exchange.name(),
                symbols = %config.symbols.join(","),
                schedule = %config.schedule,
                "Starting crossover bot"
            );

            println!("\n=== Crossover Bot ===");
            println!("Exchange:   {}", exchange.name());
            println!("Symbols:    {}", config.symbols.join(", "));
            println!("Quantity:   {}", config.risk.order_quantity);
            println!("Schedule:   {}", config.schedule);
            println!("Mode:       {}", if paper.is_some() { "PAPER (simulated orders)" } else { "LIVE TRADING" });
            println!("Telegram:   {}", if notifier.is_enabled() { "on" } else { "off (log only)" });
            println!("\nPress Ctrl+C to stop.\n");

            let mut bot = Bot::new(config, exchange, notifier, db)?;
            bot.initialize().await?;

            if let Err(e) = bot.run().await {
                error!(error = %e, "Bot error");
            }

            if let Some(paper) = paper {
                println!("\n{}", paper.stats().await);
            }
        }

        Commands::Once(args) => {
            let config = args.to_config();
            let db = Database::new(&cli.database).await?;
            let (exchange, paper) = build_exchange(&args, cli.testnet)?;
            let notifier = Notifier::from_env()?;

            let mut bot = Bot::new(config, exchange, notifier, db)?;
            bot.initialize().await?;

            println!();
            for outcome in bot.tick(Utc::now()).await {
                println!("{}", outcome);
            }

            if let Some(paper) = paper {
                println!("\n{}", paper.stats().await);
            }
        }

        Commands::Signal { market, signal } => {
            let config = signal.to_config();
            config.validate()?;

            let client = BybitClient::public(cli.testnet)?;
            let engine = SignalEngine::new(config.clone(), ReentryPolicy::Immediate);
            let label = config.average.label();

            println!(
                "\n{:<12} {:>12} {:>12} {:>12} {:>8}  {}",
                "SYMBOL",
                format!("{}{}", label, config.fast_period),
                format!("{}{}", label, config.slow_period),
                "CLOSE",
                "SIGNAL",
                "BAR"
            );
            println!("{}", "-".repeat(82));

            for symbol in &market.symbols {
                let candles = client
                    .candles(symbol, config.interval, config.lookback)
                    .await
                    .with_context(|| format!("Failed to fetch candles for {}", symbol))?;

                match engine.evaluate(symbol, &candles, Utc::now()) {
                    Ok(eval) => println!(
                        "{:<12} {:>12.4} {:>12.4} {:>12} {:>8}  {}",
                        symbol,
                        eval.fast,
                        eval.slow,
                        eval.close,
                        eval.signal.kind,
                        eval.bar_time.format("%Y-%m-%d %H:%M")
                    ),
                    Err(e) => println!("{:<12} {}", symbol, e),
                }
            }
        }

        Commands::Position { market } => {
            let credentials = Credentials::from_env()?;
            let client = BybitClient::new(BybitClient::base_url_for(cli.testnet), Some(credentials))?;

            println!("\n{:<12} {:<6} {:>12} {:>14}", "SYMBOL", "SIDE", "SIZE", "ENTRY");
            println!("{}", "-".repeat(48));

            for symbol in &market.symbols {
                let pos = client.position(symbol).await?;
                println!(
                    "{:<12} {:<6} {:>12} {:>14}",
                    pos.symbol,
                    pos.direction,
                    pos.size,
                    pos.entry_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
                );
            }
        }

        Commands::Config(args) => {
            let config = args.to_config();
            let risk = &config.risk;
            let signal = &config.signal;
            let pct = |p: Option<Decimal>| {
                p.map(|v| format!("{}%", v * Decimal::ONE_HUNDRED))
                    .unwrap_or_else(|| "off".into())
            };

            println!("\n=== Bot Configuration ===\n");
            println!("Symbols:              {}", config.symbols.join(", "));
            println!("Leverage:             {}x", config.leverage);
            println!("Schedule:             {}", config.schedule);
            println!("Testnet:              {}", cli.testnet);

            println!("\nSignal:");
            println!("  Interval:           {}", signal.interval);
            println!("  Fast / Slow:        {}{} / {}{}", signal.average.label(), signal.fast_period, signal.average.label(), signal.slow_period);
            println!("  Mode:               {:?}", signal.mode);
            println!("  Lookback:           {} candles", signal.lookback);

            println!("\nRisk:");
            println!("  Order Quantity:     {}", risk.order_quantity);
            println!("  Take Profit:        {}", pct(risk.take_profit_pct));
            println!("  Stop Loss:          {}", pct(risk.stop_loss_pct));
            println!("  Max Position:       {}", risk.max_aggregate_position);

            println!("\nReconciliation:");
            println!("  Same Direction:     {:?}", config.policy.same_direction);
            println!("  On Flat Signal:     {:?}", config.policy.on_flat_signal);
            println!("  Re-entry:           {:?}", config.policy.reentry);

            if let Err(e) = config.validate() {
                println!("\nInvalid: {}", e);
            }
        }

        Commands::History { symbol, limit } => {
            let db = Database::new(&cli.database).await?;
            let entries = db.recent_reconciliations(symbol.as_deref(), limit).await?;

            if entries.is_empty() {
                println!("No reconciliations recorded yet. Use 'crossbot run' to start the bot.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<12} {:<9} {:<24} {}",
                "TIME", "SYMBOL", "STATUS", "SIGNAL", "DETAIL"
            );
            println!("{}", "-".repeat(100));

            for entry in &entries {
                let detail = entry.error.clone().unwrap_or_else(|| entry.actions.clone());
                println!(
                    "{:<20} {:<12} {:<9} {:<24} {}",
                    entry.created_at,
                    entry.symbol,
                    entry.status,
                    truncate(&entry.signal, 22),
                    truncate(&detail, 60)
                );
            }

            println!("\n{}", db.journal_stats().await?);
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
