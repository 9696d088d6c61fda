//! The exchange seam: everything the bot needs from a venue.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::models::{
    Bracket, Candle, Direction, InstrumentSpec, KlineInterval, OrderAck, PositionSnapshot,
};

/// A linear-perpetual venue, live or simulated.
///
/// Implementations must be safe to share across instrument tasks.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent `limit` klines, in whatever order the venue returns them.
    async fn candles(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Current one-way position. Flat when nothing is held.
    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError>;

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Reduce-only market order against a held position.
    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError>;

    /// Cancel every resting order (including bracket legs) on `symbol`.
    async fn cancel_open_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    /// Market entry, optionally with TP/SL attached.
    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        bracket: Option<&Bracket>,
    ) -> Result<OrderAck, ExchangeError>;
}
