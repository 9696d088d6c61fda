//! Per-instrument loop state, owned by the polling loop and persisted between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Direction, SignalKind};

/// Memory the bot carries from one tick to the next for a single instrument.
///
/// The reconciler never sees this; it only feeds signal derivation (re-entry
/// gating) and the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    pub symbol: String,

    /// Signal handed to the reconciler on the last tick
    pub last_signal: SignalKind,

    /// Closed bar the last signal was computed on
    pub last_bar_at: Option<DateTime<Utc>>,

    /// Direction we expect to hold after the last tick's actions
    pub last_direction: Direction,

    /// Bar on which an exit we did not order (TP/SL hit) was first observed
    pub stopped_out_bar: Option<DateTime<Utc>>,
}

impl InstrumentState {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_signal: SignalKind::None,
            last_bar_at: None,
            last_direction: Direction::Flat,
            stopped_out_bar: None,
        }
    }
}
