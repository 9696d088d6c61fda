//! Bot runner: the polling loop around the reconciler.
//!
//! Each tick, for every configured instrument (concurrently):
//! - Fetch candles and derive the crossover signal on the last closed bar
//! - Query the live position
//! - Reconcile signal against position into an action plan
//! - Execute the plan, notify, persist loop state and a journal entry
//!
//! Any failure skips the tick for that instrument only; the loop keeps going
//! until Ctrl+C.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, Notifier};
use crate::db::Database;
use crate::error::ReconcileError;
use crate::models::{
    Direction, InstrumentSpec, InstrumentState, PositionSnapshot, ReconciliationAction, Signal,
};
use crate::trading::{
    projected_direction, ExecutorConfig, OrderExecutor, ReconcilePolicy, Reconciler, RiskParams,
    SignalConfig, SignalEngine,
};

/// When ticks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At second 0 of every Nth minute of the UTC day
    Aligned { minutes: u32 },
    /// Fixed period; ticks missed while busy are skipped
    Every { secs: u64 },
}

impl Schedule {
    /// First fire time strictly after `now`.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Aligned { minutes } => {
                let period = i64::from(minutes.max(1)) * 60;
                let midnight = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|t| t.and_utc())
                    .unwrap_or(now);
                let elapsed = (now - midnight).num_seconds();
                midnight + chrono::Duration::seconds((elapsed / period + 1) * period)
            }
            Schedule::Every { secs } => now + chrono::Duration::seconds(secs.max(1) as i64),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Aligned { minutes } => write!(f, "every {}m on the minute", minutes),
            Schedule::Every { secs } => write!(f, "every {}s", secs),
        }
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Instruments traded, e.g. ["SUIUSDT"]
    pub symbols: Vec<String>,

    /// Leverage set on every instrument at startup
    pub leverage: u32,

    pub risk: RiskParams,
    pub policy: ReconcilePolicy,
    pub signal: SignalConfig,
    pub schedule: Schedule,
    pub executor: ExecutorConfig,

    /// Send the fast/slow averages every tick, not only on trades
    pub notify_indicators: bool,

    /// Wait after an aligned boundary so the exchange has closed the bar
    pub settle_delay: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SUIUSDT".to_string()],
            leverage: 50,
            risk: RiskParams::default(),
            policy: ReconcilePolicy::default(),
            signal: SignalConfig::default(),
            schedule: Schedule::Aligned { minutes: 5 },
            executor: ExecutorConfig::default(),
            notify_indicators: true,
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if self.leverage == 0 {
            bail!("leverage must be at least 1");
        }
        self.risk.validate()?;
        self.signal.validate()?;
        Ok(())
    }
}

/// How a tick ended for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Noop,
    Executed,
    Skipped,
    Failed,
    Partial,
}

impl TickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStatus::Noop => "noop",
            TickStatus::Executed => "executed",
            TickStatus::Skipped => "skipped",
            TickStatus::Failed => "failed",
            TickStatus::Partial => "partial",
        }
    }

    fn from_error(err: &ReconcileError) -> Self {
        match err.status() {
            "skipped" => TickStatus::Skipped,
            "partial" => TickStatus::Partial,
            _ => TickStatus::Failed,
        }
    }
}

/// Everything one instrument's tick observed and did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub symbol: String,
    pub signal: Option<Signal>,
    pub position: Option<PositionSnapshot>,
    pub plan: Vec<ReconciliationAction>,
    pub status: TickStatus,
    pub error: Option<String>,
}

impl TickOutcome {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            signal: None,
            position: None,
            plan: Vec::new(),
            status: TickStatus::Noop,
            error: None,
        }
    }
}

impl std::fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signal = self.signal.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        write!(f, "{:<12} {:<9} signal {}", self.symbol, self.status.as_str(), signal)?;
        if let Some(pos) = &self.position {
            write!(f, " | {}", pos)?;
        }
        if !self.plan.is_empty() {
            write!(f, " | {}", describe_plan(&self.plan))?;
        }
        if let Some(err) = &self.error {
            write!(f, " | {}", err)?;
        }
        Ok(())
    }
}

/// Per-instrument decision logic and loop state.
struct Instrument {
    reconciler: Reconciler,
    state: InstrumentState,
}

/// Shared, read-only pieces each instrument task borrows.
struct TickContext<'a> {
    config: &'a BotConfig,
    exchange: &'a dyn Exchange,
    executor: &'a OrderExecutor,
    engine: &'a SignalEngine,
    notifier: &'a Notifier,
    db: &'a Database,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    exchange: Arc<dyn Exchange>,
    executor: OrderExecutor,
    engine: SignalEngine,
    notifier: Notifier,
    db: Database,
    instruments: BTreeMap<String, Instrument>,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        exchange: Arc<dyn Exchange>,
        notifier: Notifier,
        db: Database,
    ) -> Result<Self> {
        config.validate()?;

        let executor = OrderExecutor::new(exchange.clone(), config.executor.clone());
        let engine = SignalEngine::new(config.signal.clone(), config.policy.reentry);

        Ok(Self {
            config,
            exchange,
            executor,
            engine,
            notifier,
            db,
            instruments: BTreeMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set leverage, load instrument rules and restore persisted loop state.
    pub async fn initialize(&mut self) -> Result<()> {
        info!(exchange = self.exchange.name(), "Initializing bot...");

        for symbol in &self.config.symbols {
            if let Err(e) = self.exchange.set_leverage(symbol, self.config.leverage).await {
                warn!(symbol = %symbol, leverage = self.config.leverage, error = %e, "Failed to set leverage");
                self.notifier
                    .warning(&format!("{}: could not set leverage {}x: {}", symbol, self.config.leverage, e))
                    .await;
            }

            let spec = match self.exchange.instrument(symbol).await {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Instrument rules unavailable, using defaults");
                    InstrumentSpec::fallback(symbol.as_str(), 4)
                }
            };

            let reconciler = Reconciler::new(self.config.risk.clone(), self.config.policy, spec.clone());
            if reconciler.order_quantity() < spec.min_order_qty {
                bail!(
                    "{}: order quantity {} is below the minimum {} (step {})",
                    symbol,
                    reconciler.order_quantity(),
                    spec.min_order_qty,
                    spec.qty_step
                );
            }

            let state = match self.db.load_state(symbol).await? {
                Some(state) => {
                    info!(
                        symbol = %symbol,
                        last_signal = %state.last_signal,
                        last_direction = %state.last_direction,
                        "Restored loop state"
                    );
                    state
                }
                None => InstrumentState::new(symbol.as_str()),
            };

            info!(
                symbol = %symbol,
                qty = %reconciler.order_quantity(),
                price_scale = spec.price_scale,
                "Instrument ready"
            );
            self.instruments.insert(symbol.clone(), Instrument { reconciler, state });
        }

        let risk = &self.config.risk;
        let bracket = match (risk.take_profit_pct, risk.stop_loss_pct) {
            (None, None) => "no TP/SL".to_string(),
            (tp, sl) => format!(
                "TP {} / SL {}",
                tp.map(|p| format!("{}%", p * Decimal::ONE_HUNDRED)).unwrap_or_else(|| "-".into()),
                sl.map(|p| format!("{}%", p * Decimal::ONE_HUNDRED)).unwrap_or_else(|| "-".into()),
            ),
        };
        self.notifier
            .info(&format!(
                "Bot started on {}: {} | qty {} | {}x | {} on {} bars, {} | {}",
                self.exchange.name(),
                self.config.symbols.join(", "),
                risk.order_quantity,
                self.config.leverage,
                self.engine.describe(),
                self.config.signal.interval,
                self.config.schedule,
                bracket,
            ))
            .await;

        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        if self.instruments.is_empty() {
            self.initialize().await?;
        }

        info!(schedule = %self.config.schedule, "Starting bot run loop");

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut ticker = match self.config.schedule {
            Schedule::Every { secs } => {
                let mut t = interval(Duration::from_secs(secs.max(1)));
                t.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(t)
            }
            Schedule::Aligned { .. } => None,
        };

        while !self.shutdown.load(Ordering::SeqCst) {
            let wait = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => {
                        let now = Utc::now();
                        let next = self.config.schedule.next_fire(now);
                        let until = (next - now).to_std().unwrap_or_default() + self.config.settle_delay;
                        debug!(next = %next, "Sleeping until next bar");
                        tokio::time::sleep(until).await;
                    }
                }
            };

            tokio::select! {
                _ = wait => {}
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let outcomes = self.tick(Utc::now()).await;
            debug!(instruments = outcomes.len(), "Tick complete");
        }

        // Graceful shutdown
        self.shutdown().await
    }

    /// One pass over every instrument, concurrently.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<TickOutcome> {
        let Self {
            config,
            exchange,
            executor,
            engine,
            notifier,
            db,
            instruments,
            ..
        } = self;

        let ctx = TickContext {
            config,
            exchange: exchange.as_ref(),
            executor,
            engine,
            notifier,
            db,
        };

        join_all(
            instruments
                .values_mut()
                .map(|inst| process_instrument(&ctx, inst, now)),
        )
        .await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");

        match self.db.journal_stats().await {
            Ok(stats) => info!(summary = %stats, "Session journal"),
            Err(e) => warn!(error = %e, "Could not read journal stats"),
        }
        self.notifier.info("Bot stopped").await;

        Ok(())
    }
}

async fn process_instrument(ctx: &TickContext<'_>, inst: &mut Instrument, now: DateTime<Utc>) -> TickOutcome {
    let mut outcome = TickOutcome::new(&inst.state.symbol);

    if let Err(err) = run_cycle(ctx, inst, now, &mut outcome).await {
        outcome.status = TickStatus::from_error(&err);
        outcome.error = Some(err.to_string());

        let message = format!("{}: {}", outcome.symbol, err);
        if err.is_critical() {
            error!(symbol = %outcome.symbol, error = %err, "Exposure may differ from intent");
            ctx.notifier.critical(&message).await;
        } else {
            warn!(symbol = %outcome.symbol, status = outcome.status.as_str(), error = %err, "Tick skipped");
            ctx.notifier.warning(&message).await;
        }
    }

    if let Err(e) = ctx.db.save_state(&inst.state).await {
        warn!(symbol = %outcome.symbol, error = %e, "Failed to persist loop state");
    }

    let signal = outcome.signal.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    let position = outcome.position.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "-".into());
    if let Err(e) = ctx
        .db
        .record_reconciliation(
            &outcome.symbol,
            &signal,
            &position,
            &outcome.plan,
            outcome.status.as_str(),
            outcome.error.as_deref(),
        )
        .await
    {
        warn!(symbol = %outcome.symbol, error = %e, "Failed to journal reconciliation");
    }

    outcome
}

/// candles -> signal -> position -> plan -> execution, for one instrument.
async fn run_cycle(
    ctx: &TickContext<'_>,
    inst: &mut Instrument,
    now: DateTime<Utc>,
    outcome: &mut TickOutcome,
) -> Result<(), ReconcileError> {
    let symbol = inst.state.symbol.clone();
    let signal_cfg = ctx.engine.config();

    let candles = ctx
        .exchange
        .candles(&symbol, signal_cfg.interval, signal_cfg.lookback)
        .await
        .map_err(|e| ReconcileError::SignalUnavailable {
            symbol: symbol.clone(),
            reason: e.to_string(),
        })?;

    let eval = ctx.engine.evaluate(&symbol, &candles, now)?;

    if ctx.config.notify_indicators {
        let label = signal_cfg.average.label();
        ctx.notifier
            .info(&format!(
                "{} {}{}: {:.4} | {}{}: {:.4} | close {} | {}",
                symbol,
                label,
                signal_cfg.fast_period,
                eval.fast,
                label,
                signal_cfg.slow_period,
                eval.slow,
                eval.close,
                eval.signal.kind,
            ))
            .await;
    }

    let position = ctx.executor.query_position(&symbol).await?;
    outcome.position = Some(position.clone());

    let signal = ctx.engine.gate_reentry(eval.signal.clone(), &position, &mut inst.state);
    outcome.signal = Some(signal.clone());
    inst.state.last_signal = signal.kind;
    inst.state.last_bar_at = Some(eval.bar_time);

    let plan = match inst.reconciler.reconcile(&signal, &position) {
        Ok(plan) => plan,
        Err(err) => {
            inst.state.last_direction = position.direction;
            return Err(err);
        }
    };
    outcome.plan = plan.clone();

    if plan.is_empty() {
        debug!(symbol = %symbol, position = %position, signal = %signal, "Nothing to do");
        inst.state.last_direction = position.direction;
        outcome.status = TickStatus::Noop;
        return Ok(());
    }

    info!(symbol = %symbol, position = %position, signal = %signal, plan = %describe_plan(&plan), "Executing plan");

    match ctx.executor.execute(&symbol, &plan).await {
        Ok(report) => {
            let after = projected_direction(position.direction, &report.completed);
            inst.state.last_direction = after;
            outcome.status = TickStatus::Executed;

            ctx.notifier
                .trade(&format!(
                    "{}: {} -> {} on {}\n{}",
                    symbol,
                    position_label(&position),
                    after,
                    signal,
                    describe_plan(&report.completed),
                ))
                .await;
            Ok(())
        }
        Err(err) => {
            inst.state.last_direction = match &err {
                ReconcileError::PartialExecution { completed, .. } => {
                    projected_direction(position.direction, completed)
                }
                // The close was accepted; a late fill is ours, not a stop-out
                ReconcileError::CloseUnconfirmed { .. } => Direction::Flat,
                _ => position.direction,
            };
            Err(err)
        }
    }
}

fn position_label(position: &PositionSnapshot) -> String {
    match position.direction {
        Direction::Flat => "FLAT".to_string(),
        dir => format!("{} {}", dir, position.size),
    }
}

fn describe_plan(plan: &[ReconciliationAction]) -> String {
    plan.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockExchange;
    use crate::api::RecordingChannel;
    use crate::models::{Candle, SignalKind};
    use crate::paper::{PaperConfig, PaperExchange};
    use crate::trading::ReentryPolicy;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn series(closes: impl Iterator<Item = i64>) -> Vec<Candle> {
        closes
            .enumerate()
            .map(|(i, c)| {
                let close = Decimal::from(c);
                Candle {
                    start: base() + chrono::Duration::minutes(5 * i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: dec!(1),
                }
            })
            .collect()
    }

    /// Fast SMA below slow: Long under the default fade rule.
    fn falling() -> Vec<Candle> {
        series((0..30).map(|i| 200 - i))
    }

    /// Fast SMA above slow: Short under the default fade rule.
    fn rising() -> Vec<Candle> {
        series((0..30).map(|i| 100 + i))
    }

    fn after_series() -> DateTime<Utc> {
        base() + chrono::Duration::minutes(5 * 30)
    }

    fn config() -> BotConfig {
        BotConfig {
            executor: ExecutorConfig {
                confirm_attempts: 2,
                confirm_delay: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    async fn bot_with(exchange: Arc<dyn Exchange>, config: BotConfig) -> (Bot, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let db = Database::in_memory().await.unwrap();
        let mut bot = Bot::new(config, exchange, Notifier::new(channel.clone()), db).unwrap();
        bot.initialize().await.unwrap();
        (bot, channel)
    }

    #[test]
    fn test_aligned_schedule() {
        let s = Schedule::Aligned { minutes: 5 };
        let at = |h, m, sec| Utc.with_ymd_and_hms(2024, 3, 1, h, m, sec).unwrap();

        assert_eq!(s.next_fire(at(12, 3, 10)), at(12, 5, 0));
        assert_eq!(s.next_fire(at(12, 5, 0)), at(12, 10, 0));
        assert_eq!(s.next_fire(at(23, 59, 59)), Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_every_schedule() {
        let now = base();
        assert_eq!(
            Schedule::Every { secs: 30 }.next_fire(now),
            now + chrono::Duration::seconds(30)
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(BotConfig::default().validate().is_ok());
        let empty = BotConfig {
            symbols: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[tokio::test]
    async fn test_startup_sets_leverage_and_announces() {
        let mock = Arc::new(MockExchange::new().with_candles(falling()));
        let (_bot, channel) = bot_with(mock.clone(), config()).await;

        assert!(mock.calls().contains(&"leverage 50".to_string()));
        assert!(channel.messages()[0].contains("Bot started"));
    }

    #[tokio::test]
    async fn test_leverage_failure_is_not_fatal() {
        let mock = Arc::new(MockExchange::new().failing("leverage", 10001));
        let (bot, channel) = bot_with(mock, config()).await;

        assert_eq!(bot.instruments.len(), 1);
        assert!(channel.messages()[0].contains("could not set leverage"));
    }

    #[tokio::test]
    async fn test_flat_to_long_opens() {
        let mock = Arc::new(MockExchange::new().with_candles(falling()));
        let (mut bot, channel) = bot_with(mock.clone(), config()).await;

        let outcomes = bot.tick(after_series()).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, TickStatus::Executed);
        assert_eq!(mock.order_calls(), vec!["open LONG 10"]);

        let sent = channel.messages();
        assert!(sent.iter().any(|m| m.contains("SMA9")));
        assert!(sent.iter().any(|m| m.contains("open LONG 10")));

        let state = bot.db.load_state("SUIUSDT").await.unwrap().unwrap();
        assert_eq!(state.last_direction, Direction::Long);
        assert_eq!(state.last_signal, SignalKind::Long);

        let journal = bot.db.recent_reconciliations(Some("SUIUSDT"), 5).await.unwrap();
        assert_eq!(journal[0].status, "executed");
    }

    #[tokio::test]
    async fn test_reversal_closes_before_opening() {
        let mock = Arc::new(
            MockExchange::new()
                .with_candles(rising())
                .with_position(Direction::Long, dec!(10)),
        );
        let (mut bot, _) = bot_with(mock.clone(), config()).await;

        let outcomes = bot.tick(after_series()).await;
        assert_eq!(outcomes[0].status, TickStatus::Executed);
        assert_eq!(mock.order_calls(), vec!["close LONG 10", "cancel", "open SHORT 10"]);
    }

    #[tokio::test]
    async fn test_position_query_failure_places_no_orders() {
        let mock = Arc::new(
            MockExchange::new()
                .with_candles(falling())
                .failing("position", 10002),
        );
        let (mut bot, channel) = bot_with(mock.clone(), config()).await;

        let outcomes = bot.tick(after_series()).await;
        assert_eq!(outcomes[0].status, TickStatus::Skipped);
        assert!(outcomes[0].plan.is_empty());
        assert!(mock.order_calls().is_empty());
        assert!(channel.messages().iter().any(|m| m.contains("position query failed")));

        let journal = bot.db.recent_reconciliations(None, 5).await.unwrap();
        assert_eq!(journal[0].status, "skipped");
    }

    #[tokio::test]
    async fn test_short_history_skips_before_position_query() {
        let mock = Arc::new(MockExchange::new().with_candles(series((0..10).map(|i| 100 + i))));
        let (mut bot, _) = bot_with(mock.clone(), config()).await;

        let outcomes = bot.tick(after_series()).await;
        assert_eq!(outcomes[0].status, TickStatus::Skipped);
        assert!(!mock.calls().contains(&"position".to_string()));
    }

    #[tokio::test]
    async fn test_unconfirmed_close_is_critical() {
        let mock = Arc::new(
            MockExchange::new()
                .with_candles(rising())
                .with_position(Direction::Long, dec!(10))
                .with_sticky_close(),
        );
        let (mut bot, channel) = bot_with(mock.clone(), config()).await;

        let outcomes = bot.tick(after_series()).await;
        assert_eq!(outcomes[0].status, TickStatus::Failed);
        assert_eq!(mock.order_calls(), vec!["close LONG 10"]);
        assert!(channel.messages().iter().any(|m| m.starts_with("🚨")));
    }

    #[tokio::test]
    async fn test_late_close_fill_is_not_a_stop_out() {
        let mock = Arc::new(
            MockExchange::new()
                .with_candles(rising())
                .with_position(Direction::Long, dec!(10))
                .with_sticky_close(),
        );
        let cfg = BotConfig {
            policy: ReconcilePolicy {
                reentry: ReentryPolicy::NextBar,
                ..Default::default()
            },
            ..config()
        };
        let (mut bot, _) = bot_with(mock.clone(), cfg).await;

        let first = bot.tick(after_series()).await;
        assert_eq!(first[0].status, TickStatus::Failed);
        let state = bot.db.load_state("SUIUSDT").await.unwrap().unwrap();
        assert_eq!(state.last_direction, Direction::Flat);

        // The close fills after confirmation gave up; same bar, entry goes ahead
        mock.clear_position();
        let second = bot.tick(after_series()).await;
        assert_eq!(second[0].signal.as_ref().unwrap().kind, SignalKind::Short);
        assert_eq!(second[0].status, TickStatus::Executed);
        assert_eq!(mock.order_calls(), vec!["close LONG 10", "open SHORT 10"]);
    }

    #[tokio::test]
    async fn test_stable_signal_is_idempotent() {
        let mock = Arc::new(MockExchange::new().with_candles(falling()));
        let (mut bot, _) = bot_with(mock.clone(), config()).await;

        bot.tick(after_series()).await;
        let second = bot.tick(after_series()).await;

        assert_eq!(second[0].status, TickStatus::Noop);
        assert_eq!(mock.order_calls(), vec!["open LONG 10"]);
    }

    #[tokio::test]
    async fn test_paper_exchange_stop_out_defers_reentry() {
        let paper = Arc::new(PaperExchange::offline(PaperConfig::default()));
        paper.seed_candles("SUIUSDT", falling()).await;

        let cfg = BotConfig {
            risk: RiskParams {
                stop_loss_pct: Some(dec!(0.01)),
                ..Default::default()
            },
            policy: ReconcilePolicy {
                reentry: ReentryPolicy::NextBar,
                ..Default::default()
            },
            ..config()
        };
        let (mut bot, _) = bot_with(paper.clone(), cfg).await;
        assert_eq!(paper.leverage("SUIUSDT").await, Some(50));

        let first = bot.tick(after_series()).await;
        assert_eq!(first[0].status, TickStatus::Executed);
        assert_eq!(paper.position("SUIUSDT").await.unwrap().direction, Direction::Long);

        // Next bar trades through the 1% stop (171 * 0.99 = 169.29)
        let mut bars = falling();
        bars.push(Candle {
            start: after_series(),
            open: dec!(171),
            high: dec!(171),
            low: dec!(168),
            close: dec!(170),
            volume: dec!(1),
        });
        paper.seed_candles("SUIUSDT", bars).await;

        let later = after_series() + chrono::Duration::minutes(5);
        let second = bot.tick(later).await;
        assert!(paper.position("SUIUSDT").await.unwrap().is_flat());
        assert_eq!(second[0].signal.as_ref().unwrap().kind, SignalKind::None);
        assert_eq!(second[0].status, TickStatus::Noop);
        assert_eq!(paper.stats().await.bracket_exits, 1);
    }
}
