//! Typed errors for the exchange boundary and the reconciliation cycle.
//!
//! `ExchangeError` is what the I/O layer returns; `ReconcileError` is what a
//! reconciliation tick reports to the polling loop. Nothing here is fatal to
//! the process: every variant ends in a skipped tick and a notification.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::ReconciliationAction;

/// Bybit return codes that signal throttling rather than a semantic failure.
const RATE_LIMIT_CODES: [i64; 3] = [10006, 10016, 10018];

/// Failure talking to the exchange or parsing what it returned.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("exchange error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("malformed exchange response: {0}")]
    Malformed(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl ExchangeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Whether repeating the same request could succeed.
    ///
    /// Transport failures, throttling and server-side 5xx are retryable;
    /// rejected orders and unparseable payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Api { code, .. } => RATE_LIMIT_CODES.contains(code),
            Self::Malformed(_) | Self::Credentials(_) => false,
        }
    }
}

/// Why a reconciliation tick did not complete.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("position query failed for {symbol}: {source}")]
    PositionQueryFailed {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    #[error("signal unavailable for {symbol}: {reason}")]
    SignalUnavailable { symbol: String, reason: String },

    #[error("reference price {0} cannot anchor a bracket")]
    InvalidReferencePrice(Decimal),

    #[error("{action} rejected: {source}")]
    OrderRejected {
        action: ReconciliationAction,
        #[source]
        source: ExchangeError,
    },

    #[error("close on {symbol} not confirmed, {remaining} still open")]
    CloseUnconfirmed { symbol: String, remaining: Decimal },

    #[error(
        "partial execution: {} completed, failed at {failed}, {} skipped: {source}",
        completed.len(),
        skipped.len()
    )]
    PartialExecution {
        completed: Vec<ReconciliationAction>,
        failed: ReconciliationAction,
        skipped: Vec<ReconciliationAction>,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Failures that may leave exchange-side exposure different from what
    /// the bot intended. These are surfaced loudly and never retried blindly.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::PartialExecution { .. } | Self::CloseUnconfirmed { .. }
        )
    }

    /// Short status label used in the reconciliation journal.
    pub fn status(&self) -> &'static str {
        match self {
            Self::PositionQueryFailed { .. } | Self::SignalUnavailable { .. } => "skipped",
            Self::PartialExecution { .. } => "partial",
            _ => "failed",
        }
    }
}
