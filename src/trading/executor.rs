//! Order executor: applies a reconciliation plan against the exchange.
//!
//! Actions run strictly in order. A close must be confirmed flat by a fresh
//! position query before anything after it runs, so an entry can never be
//! stacked on top of exposure that failed to exit. The first failure stops
//! the plan; when earlier steps already went through, the error lists what
//! completed, what failed and what was skipped.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::api::Exchange;
use crate::error::ReconcileError;
use crate::models::{OrderAck, PositionSnapshot, ReconciliationAction};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Position queries made to confirm a close
    pub confirm_attempts: u32,

    /// Pause between confirmation queries
    pub confirm_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirm_attempts: 5,
            confirm_delay: Duration::from_millis(500),
        }
    }
}

/// What a fully successful plan did.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub completed: Vec<ReconciliationAction>,
    pub acks: Vec<OrderAck>,
}

pub struct OrderExecutor {
    exchange: Arc<dyn Exchange>,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn Exchange>, config: ExecutorConfig) -> Self {
        Self { exchange, config }
    }

    /// Fresh position for `symbol`. Any failure aborts the tick for this instrument.
    pub async fn query_position(&self, symbol: &str) -> Result<PositionSnapshot, ReconcileError> {
        self.exchange
            .position(symbol)
            .await
            .map_err(|source| ReconcileError::PositionQueryFailed {
                symbol: symbol.to_string(),
                source,
            })
    }

    pub async fn execute(
        &self,
        symbol: &str,
        actions: &[ReconciliationAction],
    ) -> Result<ExecutionReport, ReconcileError> {
        let mut report = ExecutionReport::default();

        for (i, action) in actions.iter().enumerate() {
            match self.apply(symbol, action).await {
                Ok(ack) => {
                    info!(symbol = %symbol, action = %action, "Action completed");
                    report.acks.extend(ack);
                    report.completed.push(action.clone());
                }
                Err(err) => {
                    error!(symbol = %symbol, action = %action, error = %err, "Action failed");
                    if report.completed.is_empty() {
                        return Err(err);
                    }
                    return Err(ReconcileError::PartialExecution {
                        completed: report.completed,
                        failed: action.clone(),
                        skipped: actions[i + 1..].to_vec(),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn apply(
        &self,
        symbol: &str,
        action: &ReconciliationAction,
    ) -> Result<Option<OrderAck>, ReconcileError> {
        let rejected = |source| ReconcileError::OrderRejected {
            action: action.clone(),
            source,
        };

        match action {
            ReconciliationAction::CancelOpenOrders => {
                self.exchange.cancel_open_orders(symbol).await.map_err(rejected)?;
                Ok(None)
            }
            ReconciliationAction::ClosePosition { direction, quantity } => {
                let ack = self
                    .exchange
                    .close_position(symbol, *direction, *quantity)
                    .await
                    .map_err(rejected)?;
                self.confirm_flat(symbol).await?;
                Ok(Some(ack))
            }
            ReconciliationAction::OpenPosition {
                direction,
                quantity,
                bracket,
            } => {
                let ack = self
                    .exchange
                    .open_position(symbol, *direction, *quantity, bracket.as_ref())
                    .await
                    .map_err(rejected)?;
                Ok(Some(ack))
            }
        }
    }

    async fn confirm_flat(&self, symbol: &str) -> Result<(), ReconcileError> {
        let attempts = self.config.confirm_attempts.max(1);
        let mut remaining = Decimal::ZERO;

        for attempt in 1..=attempts {
            match self.exchange.position(symbol).await {
                Ok(p) if p.is_flat() => return Ok(()),
                Ok(p) => remaining = p.size,
                Err(e) => warn!(symbol = %symbol, attempt, error = %e, "Close confirmation query failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.confirm_delay).await;
            }
        }

        Err(ReconcileError::CloseUnconfirmed {
            symbol: symbol.to_string(),
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockExchange;
    use crate::models::{Bracket, Direction};
    use rust_decimal_macros::dec;

    fn executor(mock: Arc<MockExchange>) -> OrderExecutor {
        OrderExecutor::new(
            mock,
            ExecutorConfig {
                confirm_attempts: 2,
                confirm_delay: Duration::from_millis(1),
            },
        )
    }

    fn flip() -> Vec<ReconciliationAction> {
        vec![
            ReconciliationAction::ClosePosition {
                direction: Direction::Long,
                quantity: dec!(10),
            },
            ReconciliationAction::CancelOpenOrders,
            ReconciliationAction::OpenPosition {
                direction: Direction::Short,
                quantity: dec!(10),
                bracket: Some(Bracket {
                    take_profit: Some(dec!(0.97)),
                    stop_loss: Some(dec!(1.01)),
                }),
            },
        ]
    }

    #[tokio::test]
    async fn test_flip_runs_in_order() {
        let mock = Arc::new(MockExchange::new().with_position(Direction::Long, dec!(10)));
        let report = executor(mock.clone()).execute("SUIUSDT", &flip()).await.unwrap();

        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.acks.len(), 2);
        assert_eq!(
            mock.order_calls(),
            vec!["close LONG 10", "cancel", "open SHORT 10 (TP 0.97 / SL 1.01)"]
        );
        // close was confirmed against a fresh position read
        let calls = mock.calls();
        assert_eq!(calls[1], "position");
    }

    #[tokio::test]
    async fn test_unconfirmed_close_blocks_entry() {
        let mock = Arc::new(
            MockExchange::new()
                .with_position(Direction::Long, dec!(10))
                .with_sticky_close(),
        );
        let err = executor(mock.clone()).execute("SUIUSDT", &flip()).await.unwrap_err();

        assert!(matches!(err, ReconcileError::CloseUnconfirmed { remaining, .. } if remaining == dec!(10)));
        assert!(err.is_critical());
        assert_eq!(mock.order_calls(), vec!["close LONG 10"]);
    }

    #[tokio::test]
    async fn test_rejected_entry_after_close_is_partial() {
        let mock = Arc::new(
            MockExchange::new()
                .with_position(Direction::Long, dec!(10))
                .failing("open", 110007),
        );
        let err = executor(mock).execute("SUIUSDT", &flip()).await.unwrap_err();

        match err {
            ReconcileError::PartialExecution {
                completed,
                failed,
                skipped,
                ..
            } => {
                assert_eq!(completed.len(), 2);
                assert!(failed.is_open());
                assert!(skipped.is_empty());
            }
            other => panic!("expected partial execution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_step_rejection_is_plain() {
        let mock = Arc::new(
            MockExchange::new()
                .with_position(Direction::Long, dec!(10))
                .failing("close", 110017),
        );
        let err = executor(mock.clone()).execute("SUIUSDT", &flip()).await.unwrap_err();

        assert!(matches!(err, ReconcileError::OrderRejected { .. }));
        assert!(!err.is_critical());
        assert_eq!(mock.order_calls(), vec!["close LONG 10"]);
    }

    #[tokio::test]
    async fn test_position_query_failure_is_typed() {
        let mock = Arc::new(MockExchange::new().failing("position", 10002));
        let err = tokio_test::assert_err!(executor(mock).query_position("SUIUSDT").await);
        assert!(matches!(err, ReconcileError::PositionQueryFailed { .. }));
        assert_eq!(err.status(), "skipped");
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop() {
        let mock = Arc::new(MockExchange::new());
        let report = tokio_test::assert_ok!(executor(mock.clone()).execute("SUIUSDT", &[]).await);
        assert!(report.completed.is_empty());
        assert!(mock.calls().is_empty());
    }
}
