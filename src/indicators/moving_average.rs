//! Simple and exponential moving averages over closing prices.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Which average the crossover rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverage {
    /// Arithmetic mean of the last N closes
    Simple,
    /// Exponentially weighted mean, alpha = 2 / (N + 1)
    Exponential,
}

impl MovingAverage {
    /// Value of the average at the last element of `values`.
    ///
    /// Returns `None` when fewer than `period` values are available.
    pub fn latest(&self, values: &[f64], period: usize) -> Option<f64> {
        match self {
            MovingAverage::Simple => sma(values, period),
            MovingAverage::Exponential => ema(values, period),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MovingAverage::Simple => "SMA",
            MovingAverage::Exponential => "EMA",
        }
    }
}

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(values[values.len() - period..].iter().mean())
}

/// Exponential moving average seeded with the first value (no bias adjustment).
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut iter = values.iter();
    let first = *iter.next()?;

    Some(iter.fold(first, |acc, &v| alpha * v + (1.0 - alpha) * acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_uses_trailing_window() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&closes, 3), Some(4.0));
        assert_eq!(sma(&closes, 5), Some(3.0));
        assert_eq!(sma(&closes, 6), None);
        assert_eq!(sma(&closes, 0), None);
    }

    #[test]
    fn test_ema_recursion() {
        // alpha = 0.5 for period 3
        let closes = [2.0, 4.0, 8.0];
        let value = ema(&closes, 3).unwrap();
        // 2 -> 3 -> 5.5
        assert!((value - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_ema_tracks_constant_series() {
        let closes = vec![10.0; 30];
        let value = MovingAverage::Exponential.latest(&closes, 21).unwrap();
        assert!((value - 10.0).abs() < 1e-12);
    }
}
