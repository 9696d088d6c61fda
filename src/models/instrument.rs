//! Instrument trading rules: price precision and lot sizing.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Per-instrument constants fetched from the exchange once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,

    /// Decimal places of a valid price
    pub price_scale: u32,

    /// Minimum price increment
    pub tick_size: Decimal,

    /// Quantity must be a multiple of this
    pub qty_step: Decimal,

    /// Smallest accepted order quantity
    pub min_order_qty: Decimal,
}

impl InstrumentSpec {
    /// Spec used when the exchange cannot be asked (offline paper trading).
    pub fn fallback(symbol: impl Into<String>, price_scale: u32) -> Self {
        Self {
            symbol: symbol.into(),
            price_scale,
            tick_size: Decimal::new(1, price_scale),
            qty_step: Decimal::ONE,
            min_order_qty: Decimal::ONE,
        }
    }

    /// Round a price to the nearest valid tick, half away from zero.
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return round_to_scale(price, self.price_scale);
        }
        let ticks = round_to_scale(price / self.tick_size, 0);
        round_to_scale(ticks * self.tick_size, self.price_scale)
    }

    /// Round a quantity down to a whole number of lot steps.
    pub fn align_qty(&self, qty: Decimal) -> Decimal {
        if self.qty_step <= Decimal::ZERO {
            return qty;
        }
        ((qty / self.qty_step).floor() * self.qty_step).normalize()
    }
}

/// Round `price` to `scale` decimal places, half away from zero.
fn round_to_scale(price: Decimal, scale: u32) -> Decimal {
    price.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
