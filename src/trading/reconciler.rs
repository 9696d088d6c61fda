//! Position reconciler: maps (held position, new signal) to an ordered action plan.
//!
//! Decision table, per instrument:
//!
//! | held  | signal        | plan                                        |
//! |-------|---------------|---------------------------------------------|
//! | Flat  | Long / Short  | open                                        |
//! | Flat  | Flat / None   | nothing                                     |
//! | Long  | Long          | nothing (or add, per `SameDirectionPolicy`) |
//! | Long  | Short         | close, cancel open orders, open short       |
//! | Long  | None          | nothing                                     |
//! | Long  | Flat          | nothing (or close, per `FlatSignalPolicy`)  |
//!
//! Shorts mirror longs. When `size + order_quantity` would exceed the
//! aggregate cap, no entry is planned and a held position is closed instead.
//!
//! The reconciler is pure: it owns no state beyond its configuration and
//! performs no I/O, so it can be re-run against a fresh snapshot at any time.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::ReconcileError;
use crate::models::{
    Bracket, Direction, InstrumentSpec, PositionSnapshot, ReconciliationAction,
    Signal, SignalKind,
};

use super::{FlatSignalPolicy, ReconcilePolicy, RiskParams, SameDirectionPolicy};

/// Decision logic for one instrument.
#[derive(Debug, Clone)]
pub struct Reconciler {
    risk: RiskParams,
    policy: ReconcilePolicy,
    instrument: InstrumentSpec,
    order_quantity: Decimal,
}

impl Reconciler {
    pub fn new(risk: RiskParams, policy: ReconcilePolicy, instrument: InstrumentSpec) -> Self {
        let order_quantity = instrument.align_qty(risk.order_quantity);
        Self {
            risk,
            policy,
            instrument,
            order_quantity,
        }
    }

    /// Entry quantity after lot-step alignment.
    pub fn order_quantity(&self) -> Decimal {
        self.order_quantity
    }

    /// Plan the actions that bring `position` in line with `signal`.
    ///
    /// Closes always precede opens in the returned plan.
    pub fn reconcile(
        &self,
        signal: &Signal,
        position: &PositionSnapshot,
    ) -> Result<Vec<ReconciliationAction>, ReconcileError> {
        let held = position.direction;

        let Some(target) = signal.kind.direction() else {
            return Ok(self.without_direction(signal.kind, position));
        };

        if position.size + self.order_quantity > self.risk.max_aggregate_position {
            warn!(
                symbol = %position.symbol,
                size = %position.size,
                order_qty = %self.order_quantity,
                cap = %self.risk.max_aggregate_position,
                "Aggregate position cap reached, suppressing entry"
            );
            if held.is_flat() {
                return Ok(Vec::new());
            }
            return Ok(vec![ReconciliationAction::ClosePosition {
                direction: held,
                quantity: position.size,
            }]);
        }

        let plan = match held {
            Direction::Flat => vec![self.entry(target, signal)?],
            held if held == target => match self.policy.same_direction {
                SameDirectionPolicy::Hold => Vec::new(),
                SameDirectionPolicy::Add => vec![self.entry(target, signal)?],
            },
            held => vec![
                ReconciliationAction::ClosePosition {
                    direction: held,
                    quantity: position.size,
                },
                ReconciliationAction::CancelOpenOrders,
                self.entry(target, signal)?,
            ],
        };

        debug!(
            symbol = %position.symbol,
            held = %held,
            signal = %signal.kind,
            steps = plan.len(),
            "Reconciled"
        );

        Ok(plan)
    }

    /// Bracket prices for an entry in `direction`, if any leg is configured.
    pub fn bracket_for(
        &self,
        direction: Direction,
        reference_price: Decimal,
    ) -> Result<Option<Bracket>, ReconcileError> {
        if !self.risk.has_bracket() {
            return Ok(None);
        }
        if reference_price <= Decimal::ZERO {
            return Err(ReconcileError::InvalidReferencePrice(reference_price));
        }

        Ok(Some(bracket_prices(
            direction,
            reference_price,
            self.risk.take_profit_pct,
            self.risk.stop_loss_pct,
            &self.instrument,
        )))
    }

    fn entry(&self, direction: Direction, signal: &Signal) -> Result<ReconciliationAction, ReconcileError> {
        Ok(ReconciliationAction::OpenPosition {
            direction,
            quantity: self.order_quantity,
            bracket: self.bracket_for(direction, signal.reference_price)?,
        })
    }

    fn without_direction(&self, kind: SignalKind, position: &PositionSnapshot) -> Vec<ReconciliationAction> {
        let close_on_flat = kind == SignalKind::Flat
            && self.policy.on_flat_signal == FlatSignalPolicy::Close
            && !position.is_flat();

        if close_on_flat {
            vec![
                ReconciliationAction::ClosePosition {
                    direction: position.direction,
                    quantity: position.size,
                },
                ReconciliationAction::CancelOpenOrders,
            ]
        } else {
            Vec::new()
        }
    }
}

/// Direction-aware TP/SL around `price`, rounded to the instrument's tick.
///
/// Long: tp above, sl below. Short: tp below, sl above.
pub fn bracket_prices(
    direction: Direction,
    price: Decimal,
    take_profit_pct: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
    instrument: &InstrumentSpec,
) -> Bracket {
    let (tp_sign, sl_sign) = match direction {
        Direction::Long => (Decimal::ONE, -Decimal::ONE),
        Direction::Short => (-Decimal::ONE, Decimal::ONE),
        Direction::Flat => {
            return Bracket {
                take_profit: None,
                stop_loss: None,
            }
        }
    };

    let at = |pct: Decimal, sign: Decimal| instrument.round_to_tick(price * (Decimal::ONE + sign * pct));

    Bracket {
        take_profit: take_profit_pct.map(|p| at(p, tp_sign)),
        stop_loss: stop_loss_pct.map(|p| at(p, sl_sign)),
    }
}

/// Direction held after `actions` complete, starting from `start`.
pub fn projected_direction(start: Direction, actions: &[ReconciliationAction]) -> Direction {
    actions.iter().fold(start, |dir, action| match action {
        ReconciliationAction::ClosePosition { .. } => Direction::Flat,
        ReconciliationAction::OpenPosition { direction, .. } => *direction,
        ReconciliationAction::CancelOpenOrders => dir,
    })
}
