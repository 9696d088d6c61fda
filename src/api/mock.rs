//! Scriptable in-memory exchange for tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ExchangeError;
use crate::models::{
    Bracket, Candle, Direction, InstrumentSpec, KlineInterval, OrderAck, PositionSnapshot,
};

use super::exchange::Exchange;

#[derive(Default)]
struct MockState {
    position: Option<(Direction, Decimal)>,
    candles: Vec<Candle>,
    calls: Vec<String>,
    /// Operation name -> Bybit retCode to fail with
    failures: HashMap<&'static str, i64>,
    /// Closes are acknowledged but the position stays open
    sticky_close: bool,
    order_seq: u32,
}

/// Records every call; positions move as orders "fill" instantly.
#[derive(Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(self, direction: Direction, size: Decimal) -> Self {
        self.state.lock().unwrap().position = Some((direction, size));
        self
    }

    pub fn with_candles(self, candles: Vec<Candle>) -> Self {
        self.state.lock().unwrap().candles = candles;
        self
    }

    /// Make `op` ("position", "candles", "close", "cancel", "open",
    /// "leverage", "instrument") fail with the given return code.
    pub fn failing(self, op: &'static str, code: i64) -> Self {
        self.state.lock().unwrap().failures.insert(op, code);
        self
    }

    pub fn with_sticky_close(self) -> Self {
        self.state.lock().unwrap().sticky_close = true;
        self
    }

    /// Simulate a fill that landed outside the bot's view.
    pub fn clear_position(&self) {
        self.state.lock().unwrap().position = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change exchange state (orders, cancels, leverage).
    pub fn order_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("open") || c.starts_with("close") || c.starts_with("cancel"))
            .collect()
    }

    fn record(&self, call: String, op: &'static str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.get(op) {
            Some(&code) => Err(ExchangeError::Api {
                code,
                message: format!("injected {} failure", op),
            }),
            None => Ok(()),
        }
    }

    fn ack(&self) -> OrderAck {
        let mut state = self.state.lock().unwrap();
        state.order_seq += 1;
        OrderAck {
            order_id: format!("mock-{}", state.order_seq),
            order_link_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn candles(
        &self,
        _symbol: &str,
        _interval: KlineInterval,
        _limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.record("candles".into(), "candles")?;
        Ok(self.state.lock().unwrap().candles.clone())
    }

    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        self.record("position".into(), "position")?;
        match self.state.lock().unwrap().position {
            Some((dir, size)) => PositionSnapshot::new(symbol, dir, size, Some(Decimal::ONE)),
            None => Ok(PositionSnapshot::flat(symbol)),
        }
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, ExchangeError> {
        self.record("instrument".into(), "instrument")?;
        Ok(InstrumentSpec::fallback(symbol, 4))
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.record(format!("leverage {}", leverage), "leverage")
    }

    async fn close_position(
        &self,
        _symbol: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        self.record(format!("close {} {}", direction, quantity), "close")?;
        {
            let mut state = self.state.lock().unwrap();
            if !state.sticky_close {
                state.position = match state.position {
                    Some((dir, size)) if size > quantity => Some((dir, size - quantity)),
                    _ => None,
                };
            }
        }
        Ok(self.ack())
    }

    async fn cancel_open_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        self.record("cancel".into(), "cancel")
    }

    async fn open_position(
        &self,
        _symbol: &str,
        direction: Direction,
        quantity: Decimal,
        bracket: Option<&Bracket>,
    ) -> Result<OrderAck, ExchangeError> {
        let call = match bracket {
            Some(b) => format!("open {} {} ({})", direction, quantity, b),
            None => format!("open {} {}", direction, quantity),
        };
        self.record(call, "open")?;
        {
            let mut state = self.state.lock().unwrap();
            state.position = match state.position {
                Some((dir, size)) if dir == direction => Some((dir, size + quantity)),
                _ => Some((direction, quantity)),
            };
        }
        Ok(self.ack())
    }
}
