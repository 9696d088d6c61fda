//! Trading configuration: sizing/risk limits, reconciliation policy, signal rule.

use anyhow::{bail, Result};
use clap::ValueEnum;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::indicators::MovingAverage;
use crate::models::KlineInterval;

/// Sizing and bracket parameters. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Quantity of every entry order, in contracts
    pub order_quantity: Decimal,

    /// Take profit as a fraction of the reference price (0.03 = 3%)
    pub take_profit_pct: Option<Decimal>,

    /// Stop loss as a fraction of the reference price
    pub stop_loss_pct: Option<Decimal>,

    /// Largest position size an entry may produce
    pub max_aggregate_position: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            order_quantity: dec!(10),
            take_profit_pct: None,
            stop_loss_pct: None,
            max_aggregate_position: dec!(50),
        }
    }
}

impl RiskParams {
    /// Reject configurations that could never place a sane order.
    pub fn validate(&self) -> Result<()> {
        if self.order_quantity <= Decimal::ZERO {
            bail!("order quantity must be positive, got {}", self.order_quantity);
        }
        if self.max_aggregate_position < self.order_quantity {
            bail!(
                "max aggregate position {} is below the order quantity {}",
                self.max_aggregate_position,
                self.order_quantity
            );
        }
        for (name, pct) in [
            ("take profit", self.take_profit_pct),
            ("stop loss", self.stop_loss_pct),
        ] {
            if let Some(p) = pct {
                if p <= Decimal::ZERO || p >= Decimal::ONE {
                    bail!("{} must be within (0, 1) as a fraction, got {}", name, p);
                }
            }
        }
        Ok(())
    }

    pub fn has_bracket(&self) -> bool {
        self.take_profit_pct.is_some() || self.stop_loss_pct.is_some()
    }
}

/// What to do when the signal agrees with the held direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SameDirectionPolicy {
    /// Already positioned correctly, do nothing
    #[default]
    Hold,
    /// Add another entry, bounded by the aggregate cap
    Add,
}

/// What to do with an open position when the signal is an explicit `Flat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FlatSignalPolicy {
    /// Keep the position; only an opposite signal or a bracket exits
    #[default]
    Hold,
    /// Close the position
    Close,
}

/// Whether to re-enter on the same bar after a bracket closed the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReentryPolicy {
    #[default]
    Immediate,
    /// Wait for the next closed bar
    NextBar,
}

/// Policy knobs for the reconciliation decision table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    pub same_direction: SameDirectionPolicy,
    pub on_flat_signal: FlatSignalPolicy,
    pub reentry: ReentryPolicy,
}

/// Orientation of the crossover rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CrossoverMode {
    /// Fast below slow is long, fast above slow is short
    #[default]
    Fade,
    /// Fast above slow is long, fast below slow is short
    Follow,
}

/// Moving-average crossover rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub interval: KlineInterval,
    pub fast_period: usize,
    pub slow_period: usize,
    pub average: MovingAverage,
    pub mode: CrossoverMode,

    /// Candles requested per evaluation
    pub lookback: u32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            interval: KlineInterval::M5,
            fast_period: 9,
            slow_period: 21,
            average: MovingAverage::Simple,
            mode: CrossoverMode::Fade,
            lookback: 30,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fast_period == 0 || self.fast_period >= self.slow_period {
            bail!(
                "fast period {} must be positive and shorter than slow period {}",
                self.fast_period,
                self.slow_period
            );
        }
        // One extra candle is needed because the in-progress bar is dropped
        if (self.lookback as usize) <= self.slow_period {
            bail!(
                "lookback {} must exceed the slow period {}",
                self.lookback,
                self.slow_period
            );
        }
        Ok(())
    }
}
