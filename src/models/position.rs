//! Position snapshot: the exchange's view of our holding in one instrument.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// Side of a held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Flat => "FLAT",
        }
    }

    /// Parse the stored representation produced by `as_str`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            "FLAT" => Some(Direction::Flat),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Flat => Direction::Flat,
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Direction::Flat)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current position in a linear perpetual, as reported by the exchange.
///
/// Always queried fresh before a decision. A zero-size snapshot is flat and a
/// flat snapshot has zero size; the constructor enforces both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Instrument symbol (e.g. "SUIUSDT")
    pub symbol: String,

    /// Held direction
    pub direction: Direction,

    /// Absolute position size in contracts
    pub size: Decimal,

    /// Average entry price, when the exchange reports one
    pub entry_price: Option<Decimal>,

    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl PositionSnapshot {
    /// Build a validated snapshot.
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        size: Decimal,
        entry_price: Option<Decimal>,
    ) -> Result<Self, ExchangeError> {
        let symbol = symbol.into();

        if size < Decimal::ZERO {
            return Err(ExchangeError::malformed(format!(
                "negative position size {} for {}",
                size, symbol
            )));
        }

        if size.is_zero() {
            return Ok(Self::flat(symbol));
        }

        if direction.is_flat() {
            return Err(ExchangeError::malformed(format!(
                "position of size {} on {} has no side",
                size, symbol
            )));
        }

        Ok(Self {
            symbol,
            direction,
            size,
            entry_price: entry_price.filter(|p| *p > Decimal::ZERO),
            fetched_at: Utc::now(),
        })
    }

    /// A snapshot with no open position.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            direction: Direction::Flat,
            size: Decimal::ZERO,
            entry_price: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction.is_flat()
    }
}

impl fmt::Display for PositionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.direction, self.entry_price) {
            (Direction::Flat, _) => write!(f, "{} FLAT", self.symbol),
            (dir, Some(entry)) => write!(f, "{} {} {} @ {}", self.symbol, dir, self.size, entry),
            (dir, None) => write!(f, "{} {} {}", self.symbol, dir, self.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_size_is_flat() {
        let pos = PositionSnapshot::new("SUIUSDT", Direction::Long, dec!(0), Some(dec!(1.5))).unwrap();
        assert!(pos.is_flat());
        assert_eq!(pos.entry_price, None);
    }

    #[test]
    fn test_sized_position_requires_side() {
        let err = PositionSnapshot::new("SUIUSDT", Direction::Flat, dec!(10), None).unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed(_)));

        let err = PositionSnapshot::new("SUIUSDT", Direction::Long, dec!(-1), None).unwrap_err();
        assert!(matches!(err, ExchangeError::Malformed(_)));
    }

    #[test]
    fn test_direction_roundtrip_labels() {
        for dir in [Direction::Long, Direction::Short, Direction::Flat] {
            assert_eq!(Direction::parse(dir.as_str()), Some(dir));
        }
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::parse("sideways"), None);
    }
}
