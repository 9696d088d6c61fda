//! Exchange and notification clients.

mod bybit_client;
mod exchange;
mod retry;
mod telegram;
mod types;

#[cfg(test)]
pub mod mock;

pub use bybit_client::{BybitClient, Credentials};
pub use exchange::Exchange;
pub use telegram::Notifier;

#[cfg(test)]
pub use telegram::RecordingChannel;
