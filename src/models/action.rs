//! Side-effecting steps the reconciler asks the order layer to perform.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Take-profit / stop-loss prices attached to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
}

impl fmt::Display for Bracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.take_profit, self.stop_loss) {
            (Some(tp), Some(sl)) => write!(f, "TP {} / SL {}", tp, sl),
            (Some(tp), None) => write!(f, "TP {}", tp),
            (None, Some(sl)) => write!(f, "SL {}", sl),
            (None, None) => write!(f, "no bracket"),
        }
    }
}

/// One step of a reconciliation plan. Created per tick, executed, discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationAction {
    CancelOpenOrders,
    ClosePosition {
        direction: Direction,
        quantity: Decimal,
    },
    OpenPosition {
        direction: Direction,
        quantity: Decimal,
        bracket: Option<Bracket>,
    },
}

impl ReconciliationAction {
    pub fn is_open(&self) -> bool {
        matches!(self, ReconciliationAction::OpenPosition { .. })
    }

    pub fn is_close(&self) -> bool {
        matches!(self, ReconciliationAction::ClosePosition { .. })
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationAction::CancelOpenOrders => write!(f, "cancel open orders"),
            ReconciliationAction::ClosePosition { direction, quantity } => {
                write!(f, "close {} {}", direction, quantity)
            }
            ReconciliationAction::OpenPosition {
                direction,
                quantity,
                bracket: Some(bracket),
            } => write!(f, "open {} {} ({})", direction, quantity, bracket),
            ReconciliationAction::OpenPosition { direction, quantity, bracket: None } => {
                write!(f, "open {} {}", direction, quantity)
            }
        }
    }
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub order_link_id: String,
}
