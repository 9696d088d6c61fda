//! Paper exchange: simulated fills against live or seeded market data.
//!
//! Orders fill instantly at the last observed close, minus a taker fee.
//! TP/SL legs live with the position and are triggered by the high/low of
//! candles from the bar the position was opened on, the stop checked first.
//! A bar still forming is re-checked on every read until it has closed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::api::Exchange;
use crate::error::ExchangeError;
use crate::models::{
    Bracket, Candle, Direction, InstrumentSpec, KlineInterval, OrderAck, PositionSnapshot,
};

/// Bybit's "position is zero, reduce-only order rejected".
const NO_POSITION_CODE: i64 = 110017;
/// Generic "params error".
const PARAMS_ERROR_CODE: i64 = 10001;

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting balance in USDT
    pub initial_balance: Decimal,

    /// Fee charged on every fill, as a fraction of notional
    pub fee_rate: Decimal,

    /// Price precision used when no market source can describe the instrument
    pub price_scale: u32,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: dec!(0.00055), // Bybit taker
            price_scale: 4,
        }
    }
}

/// Why a simulated fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillReason {
    Open,
    Close,
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone)]
pub struct PaperFill {
    pub symbol: String,
    pub direction: Direction,
    pub reason: FillReason,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Realized P&L for exits, zero for entries
    pub pnl: Decimal,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    direction: Direction,
    size: Decimal,
    entry_price: Decimal,
    bracket: Option<Bracket>,
    /// Bars starting before this predate the bracket
    armed_from: DateTime<Utc>,
}

impl PaperPosition {
    fn pnl_at(&self, price: Decimal, qty: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => (price - self.entry_price) * qty,
            Direction::Short => (self.entry_price - price) * qty,
            Direction::Flat => Decimal::ZERO,
        }
    }

    /// Exit price and reason if a bracket leg is crossed by `candle`.
    fn triggered_by(&self, candle: &Candle) -> Option<(Decimal, FillReason)> {
        let bracket = self.bracket.as_ref()?;
        match self.direction {
            Direction::Long => match (bracket.stop_loss, bracket.take_profit) {
                (Some(sl), _) if candle.low <= sl => Some((sl, FillReason::StopLoss)),
                (_, Some(tp)) if candle.high >= tp => Some((tp, FillReason::TakeProfit)),
                _ => None,
            },
            Direction::Short => match (bracket.stop_loss, bracket.take_profit) {
                (Some(sl), _) if candle.high >= sl => Some((sl, FillReason::StopLoss)),
                (_, Some(tp)) if candle.low <= tp => Some((tp, FillReason::TakeProfit)),
                _ => None,
            },
            Direction::Flat => None,
        }
    }
}

struct Book {
    balance: Decimal,
    total_fees: Decimal,
    positions: HashMap<String, PaperPosition>,
    seeded: HashMap<String, Vec<Candle>>,
    last_price: HashMap<String, Decimal>,
    /// Start of the newest closed bar already checked against brackets
    closed_through: HashMap<String, DateTime<Utc>>,
    /// Start of the newest bar observed, closed or not
    newest_bar: HashMap<String, DateTime<Utc>>,
    leverage: HashMap<String, u32>,
    fills: Vec<PaperFill>,
    order_seq: u64,
}

impl Book {
    fn fill(
        &mut self,
        symbol: &str,
        direction: Direction,
        reason: FillReason,
        quantity: Decimal,
        price: Decimal,
        fee_rate: Decimal,
        pnl: Decimal,
    ) -> OrderAck {
        let fee = price * quantity * fee_rate;
        self.balance += pnl - fee;
        self.total_fees += fee;
        self.fills.push(PaperFill {
            symbol: symbol.to_string(),
            direction,
            reason,
            quantity,
            price,
            fee,
            pnl,
        });

        self.order_seq += 1;
        OrderAck {
            order_id: format!("paper-{}", self.order_seq),
            order_link_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Remove up to `qty` from the position at `price`.
    fn reduce(&mut self, symbol: &str, qty: Decimal, price: Decimal, reason: FillReason, fee_rate: Decimal) -> Option<OrderAck> {
        let pos = self.positions.get_mut(symbol)?;
        let qty = qty.min(pos.size);
        let pnl = pos.pnl_at(price, qty);
        let direction = pos.direction;
        pos.size -= qty;
        if pos.size.is_zero() {
            self.positions.remove(symbol);
        }
        Some(self.fill(symbol, direction, reason, qty, price, fee_rate, pnl))
    }
}

/// In-memory exchange implementing the same trait as the live client.
pub struct PaperExchange {
    config: PaperConfig,
    market: Option<Arc<dyn Exchange>>,
    book: Mutex<Book>,
    started_at: DateTime<Utc>,
}

impl PaperExchange {
    /// `market` supplies candles and instrument rules; `None` means only
    /// seeded candles are available.
    pub fn new(config: PaperConfig, market: Option<Arc<dyn Exchange>>) -> Self {
        let book = Book {
            balance: config.initial_balance,
            total_fees: Decimal::ZERO,
            positions: HashMap::new(),
            seeded: HashMap::new(),
            last_price: HashMap::new(),
            closed_through: HashMap::new(),
            newest_bar: HashMap::new(),
            leverage: HashMap::new(),
            fills: Vec::new(),
            order_seq: 0,
        };
        Self {
            config,
            market,
            book: Mutex::new(book),
            started_at: Utc::now(),
        }
    }

    pub fn offline(config: PaperConfig) -> Self {
        Self::new(config, None)
    }

    /// Replace the candle series served for `symbol` when no market source is set.
    pub async fn seed_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.book.lock().await.seeded.insert(symbol.to_string(), candles);
    }

    pub async fn fills(&self) -> Vec<PaperFill> {
        self.book.lock().await.fills.clone()
    }

    pub async fn leverage(&self, symbol: &str) -> Option<u32> {
        self.book.lock().await.leverage.get(symbol).copied()
    }

    /// Update marks and fire any bracket crossed by bars not yet checked
    /// as closed. Only closed bars advance the watermark, so a bar first seen
    /// mid-formation is checked again once its final range is known.
    async fn observe(&self, symbol: &str, candles: &[Candle], interval: KlineInterval, now: DateTime<Utc>) {
        let mut sorted: Vec<&Candle> = candles.iter().collect();
        sorted.sort_by_key(|c| c.start);
        let Some(latest) = sorted.last() else {
            return;
        };

        let mut book = self.book.lock().await;
        let checked = book.closed_through.get(symbol).copied();

        for candle in sorted.iter().filter(|c| checked.map_or(true, |t| c.start > t)) {
            let hit = book
                .positions
                .get(symbol)
                .filter(|p| candle.start >= p.armed_from)
                .and_then(|p| p.triggered_by(candle).map(|hit| (hit, p.size, p.direction)));

            if let Some(((price, reason), size, direction)) = hit {
                book.reduce(symbol, size, price, reason, self.config.fee_rate);
                info!(
                    symbol = %symbol,
                    direction = %direction,
                    price = %price,
                    reason = ?reason,
                    "Paper bracket triggered"
                );
            }
        }

        if let Some(closed) = sorted.iter().rev().find(|c| c.is_closed(interval, now)) {
            book.closed_through.insert(symbol.to_string(), closed.start);
        }
        book.newest_bar.insert(symbol.to_string(), latest.start);
        book.last_price.insert(symbol.to_string(), latest.close);
    }

    async fn mark(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.book
            .lock()
            .await
            .last_price
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::malformed(format!("no price observed for {} yet", symbol)))
    }

    pub async fn stats(&self) -> PaperStats {
        let book = self.book.lock().await;

        let unrealized: Decimal = book
            .positions
            .iter()
            .map(|(symbol, pos)| {
                let price = book.last_price.get(symbol).copied().unwrap_or(pos.entry_price);
                pos.pnl_at(price, pos.size)
            })
            .sum();

        let exits: Vec<&PaperFill> = book
            .fills
            .iter()
            .filter(|f| f.reason != FillReason::Open)
            .collect();
        let winners = exits.iter().filter(|f| f.pnl > Decimal::ZERO).count();
        let win_rate = if exits.is_empty() {
            0.0
        } else {
            winners as f64 / exits.len() as f64
        };
        let realized: Decimal = exits.iter().map(|f| f.pnl).sum();

        PaperStats {
            initial_balance: self.config.initial_balance,
            balance: book.balance,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            total_fees: book.total_fees,
            return_pct: ((book.balance + unrealized - self.config.initial_balance)
                / self.config.initial_balance)
                .to_f64()
                .unwrap_or(0.0),
            open_positions: book.positions.len(),
            fills: book.fills.len(),
            closed_trades: exits.len(),
            bracket_exits: exits
                .iter()
                .filter(|f| matches!(f.reason, FillReason::TakeProfit | FillReason::StopLoss))
                .count(),
            win_rate,
            running_since: self.started_at,
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn candles(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let candles = match &self.market {
            Some(market) => market.candles(symbol, interval, limit).await?,
            None => {
                let book = self.book.lock().await;
                let series = book.seeded.get(symbol).cloned().unwrap_or_default();
                let skip = series.len().saturating_sub(limit as usize);
                series.into_iter().skip(skip).collect()
            }
        };

        self.observe(symbol, &candles, interval, Utc::now()).await;
        Ok(candles)
    }

    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        let book = self.book.lock().await;
        match book.positions.get(symbol) {
            Some(p) => PositionSnapshot::new(symbol, p.direction, p.size, Some(p.entry_price)),
            None => Ok(PositionSnapshot::flat(symbol)),
        }
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, ExchangeError> {
        match &self.market {
            Some(market) => market.instrument(symbol).await,
            None => Ok(InstrumentSpec::fallback(symbol, self.config.price_scale)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.book.lock().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let price = self.mark(symbol).await?;
        let mut book = self.book.lock().await;

        let held = book.positions.get(symbol).map(|p| p.direction);
        if held != Some(direction) {
            return Err(ExchangeError::Api {
                code: NO_POSITION_CODE,
                message: format!("no {} position on {} to reduce", direction, symbol),
            });
        }

        book.reduce(symbol, quantity, price, FillReason::Close, self.config.fee_rate)
            .ok_or_else(|| ExchangeError::malformed("position vanished during close"))
    }

    async fn cancel_open_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        // Only position-level TP/SL is simulated, and cancel-all leaves those alone
        Ok(())
    }

    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        bracket: Option<&Bracket>,
    ) -> Result<OrderAck, ExchangeError> {
        if direction.is_flat() || quantity <= Decimal::ZERO {
            return Err(ExchangeError::Api {
                code: PARAMS_ERROR_CODE,
                message: format!("invalid entry {} {}", direction, quantity),
            });
        }

        let price = self.mark(symbol).await?;
        let mut book = self.book.lock().await;
        let armed_from = book
            .newest_bar
            .get(symbol)
            .copied()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match book.positions.get_mut(symbol) {
            Some(pos) if pos.direction != direction => {
                return Err(ExchangeError::Api {
                    code: PARAMS_ERROR_CODE,
                    message: format!(
                        "{} entry would net against an open {} position",
                        direction, pos.direction
                    ),
                });
            }
            Some(pos) => {
                let notional = pos.entry_price * pos.size + price * quantity;
                pos.size += quantity;
                pos.entry_price = notional / pos.size;
                if bracket.is_some() {
                    pos.bracket = bracket.cloned();
                    pos.armed_from = armed_from;
                }
            }
            None => {
                book.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        direction,
                        size: quantity,
                        entry_price: price,
                        bracket: bracket.cloned(),
                        armed_from,
                    },
                );
            }
        }

        Ok(book.fill(
            symbol,
            direction,
            FillReason::Open,
            quantity,
            price,
            self.config.fee_rate,
            Decimal::ZERO,
        ))
    }
}

/// Paper trading statistics.
#[derive(Debug, Clone)]
pub struct PaperStats {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_fees: Decimal,
    pub return_pct: f64,
    pub open_positions: usize,
    pub fills: usize,
    pub closed_trades: usize,
    pub bracket_exits: usize,
    pub win_rate: f64,
    pub running_since: DateTime<Utc>,
}

impl fmt::Display for PaperStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " PAPER TRADING ")?;
        writeln!(f, "Running since: {}", self.running_since.format("%Y-%m-%d %H:%M"))?;
        writeln!(f)?;
        writeln!(f, "Initial Balance:  ${:.2}", self.initial_balance)?;
        writeln!(f, "Balance:          ${:.2}", self.balance)?;
        writeln!(f)?;
        writeln!(f, "Realized P&L:     ${:.2}", self.realized_pnl)?;
        writeln!(f, "Unrealized P&L:   ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Return:           {:.2}%", self.return_pct * 100.0)?;
        writeln!(f, "Fees Paid:        ${:.2}", self.total_fees)?;
        writeln!(f)?;
        writeln!(f, "Open Positions:   {}", self.open_positions)?;
        writeln!(f, "Fills:            {}", self.fills)?;
        writeln!(f, "Closed Trades:    {} ({} by TP/SL)", self.closed_trades, self.bracket_exits)?;
        writeln!(f, "Win Rate:         {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
