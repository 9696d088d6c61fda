//! Trading signal produced once per evaluation tick.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// What the indicator pipeline wants the position to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Long,
    Short,
    /// Explicit request to be out of the market
    Flat,
    /// No opinion this tick
    #[default]
    None,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Long => "LONG",
            SignalKind::Short => "SHORT",
            SignalKind::Flat => "FLAT",
            SignalKind::None => "NONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" => Some(SignalKind::Long),
            "SHORT" => Some(SignalKind::Short),
            "FLAT" => Some(SignalKind::Flat),
            "NONE" => Some(SignalKind::None),
            _ => None,
        }
    }

    /// Target direction for directional signals.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            SignalKind::Long => Some(Direction::Long),
            SignalKind::Short => Some(Direction::Short),
            SignalKind::Flat | SignalKind::None => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signal plus the price it was evaluated at.
///
/// `reference_price` anchors bracket (TP/SL) pricing; `bar_time` is the open
/// time of the closed candle the signal was computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub reference_price: Decimal,
    pub bar_time: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn new(kind: SignalKind, reference_price: Decimal) -> Self {
        Self {
            kind,
            reference_price,
            bar_time: None,
        }
    }

    pub fn long(reference_price: Decimal) -> Self {
        Self::new(SignalKind::Long, reference_price)
    }

    pub fn short(reference_price: Decimal) -> Self {
        Self::new(SignalKind::Short, reference_price)
    }

    pub fn flat() -> Self {
        Self::new(SignalKind::Flat, Decimal::ZERO)
    }

    pub fn none() -> Self {
        Self::new(SignalKind::None, Decimal::ZERO)
    }

    pub fn at_bar(mut self, bar_time: DateTime<Utc>) -> Self {
        self.bar_time = Some(bar_time);
        self
    }

    /// Same price and bar, but with no opinion.
    pub fn suppressed(&self) -> Self {
        Self {
            kind: SignalKind::None,
            reference_price: self.reference_price,
            bar_time: self.bar_time,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.direction().is_some() {
            write!(f, "{} @ {}", self.kind, self.reference_price)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}
