//! Wallet transaction lifecycle manager
//!
//! Submits signed transactions to a ledger node, tracks them to confirmation
//! with per-hash watchers, and supports fee-bump replacement and sequential
//! batches with contiguous nonces.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod state;
pub mod tx;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{TxManagerError, TxManagerResult};
pub use manager::TxManager;
