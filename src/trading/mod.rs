//! Trading logic: signal derivation, position reconciliation, order execution.

mod config;
mod executor;
mod reconciler;
mod signal_engine;

pub use config::{
    CrossoverMode, FlatSignalPolicy, ReconcilePolicy, ReentryPolicy, RiskParams,
    SameDirectionPolicy, SignalConfig,
};
pub use executor::{ExecutorConfig, OrderExecutor};
pub use reconciler::{projected_direction, Reconciler};
pub use signal_engine::SignalEngine;
