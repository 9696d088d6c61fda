//! Moving-average crossover signal derivation.
//!
//! Signals are computed on the latest *closed* candle only. Bybit returns the
//! in-progress bar as the first kline entry; it is dropped before averaging.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::models::{Candle, InstrumentState, PositionSnapshot, Signal, SignalKind};

use super::{CrossoverMode, ReentryPolicy, SignalConfig};

/// Result of one evaluation, kept for notifications and the journal.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub signal: Signal,
    pub fast: f64,
    pub slow: f64,
    /// Open time of the closed bar evaluated
    pub bar_time: DateTime<Utc>,
    pub close: Decimal,
}

pub struct SignalEngine {
    config: SignalConfig,
    reentry: ReentryPolicy,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, reentry: ReentryPolicy) -> Self {
        Self { config, reentry }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Human-readable description of the indicator pair, e.g. `SMA9/SMA21`.
    pub fn describe(&self) -> String {
        let label = self.config.average.label();
        format!(
            "{}{}/{}{}",
            label, self.config.fast_period, label, self.config.slow_period
        )
    }

    /// Derive a signal from `candles`, in any order, as of `now`.
    pub fn evaluate(
        &self,
        symbol: &str,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<Evaluation, ReconcileError> {
        let mut closed: Vec<&Candle> = candles
            .iter()
            .filter(|c| c.is_closed(self.config.interval, now))
            .collect();
        closed.sort_by_key(|c| c.start);

        let unavailable = |reason: String| ReconcileError::SignalUnavailable {
            symbol: symbol.to_string(),
            reason,
        };

        if closed.len() < self.config.slow_period {
            return Err(unavailable(format!(
                "{} closed candles, need {}",
                closed.len(),
                self.config.slow_period
            )));
        }

        let closes: Vec<f64> = closed
            .iter()
            .map(|c| c.close.to_f64())
            .collect::<Option<_>>()
            .ok_or_else(|| unavailable("close price not representable".to_string()))?;

        let average = self.config.average;
        let (fast, slow) = match (
            average.latest(&closes, self.config.fast_period),
            average.latest(&closes, self.config.slow_period),
        ) {
            (Some(f), Some(s)) => (f, s),
            _ => return Err(unavailable("not enough history for averages".to_string())),
        };

        let kind = match (fast.partial_cmp(&slow), self.config.mode) {
            (Some(Ordering::Less), CrossoverMode::Fade) => SignalKind::Long,
            (Some(Ordering::Greater), CrossoverMode::Fade) => SignalKind::Short,
            (Some(Ordering::Greater), CrossoverMode::Follow) => SignalKind::Long,
            (Some(Ordering::Less), CrossoverMode::Follow) => SignalKind::Short,
            _ => SignalKind::None,
        };

        // closed is non-empty: slow_period > 0 is enforced by SignalConfig::validate
        let last = closed[closed.len() - 1];
        let signal = Signal::new(kind, last.close).at_bar(last.start);

        debug!(
            symbol = %symbol,
            bar = %last.start,
            fast,
            slow,
            signal = %kind,
            "Evaluated crossover"
        );

        Ok(Evaluation {
            signal,
            fast,
            slow,
            bar_time: last.start,
            close: last.close,
        })
    }

    /// Detect exits the bot did not order and apply the re-entry policy.
    ///
    /// An exit is inferred when the last tick left us positioned and the
    /// exchange now reports flat. Under `NextBar`, directional signals on the
    /// bar where that exit was seen are suppressed.
    pub fn gate_reentry(
        &self,
        signal: Signal,
        position: &PositionSnapshot,
        state: &mut InstrumentState,
    ) -> Signal {
        if !state.last_direction.is_flat() && position.is_flat() {
            info!(
                symbol = %position.symbol,
                was = %state.last_direction,
                "Position closed outside the bot (bracket hit or manual)"
            );
            state.stopped_out_bar = signal.bar_time;
        }

        let same_bar = signal.bar_time.is_some() && signal.bar_time == state.stopped_out_bar;
        if self.reentry == ReentryPolicy::NextBar
            && same_bar
            && signal.kind.direction().is_some()
        {
            info!(
                symbol = %position.symbol,
                signal = %signal.kind,
                "Re-entry deferred to the next bar"
            );
            return signal.suppressed();
        }

        signal
    }
}
