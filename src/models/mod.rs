//! Data models for signals, positions, candles, instruments and actions.

mod action;
mod candle;
mod instrument;
mod position;
mod signal;
mod state;

pub use action::{Bracket, OrderAck, ReconciliationAction};
pub use candle::{Candle, KlineInterval};
pub use instrument::InstrumentSpec;
pub use position::{Direction, PositionSnapshot};
pub use signal::{Signal, SignalKind};
pub use state::InstrumentState;
