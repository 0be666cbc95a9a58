//! Confirmation watchers
//!
//! One polling task per in-flight transaction hash. A watcher promotes its
//! transaction to a terminal state when a receipt arrives, or gives up after
//! the configured retry budget.

mod pool;

pub use pool::WatcherPool;

use crate::types::{Receipt, Transaction};

use ethers::types::H256;

/// How a watcher finished
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// Receipt reported success
    Confirmed {
        receipt: Receipt,
        transaction: Option<Transaction>,
    },

    /// Receipt reported execution failure
    Reverted {
        receipt: Receipt,
        transaction: Option<Transaction>,
    },

    /// Retry budget ran out without a receipt
    Exhausted {
        hash: H256,
        attempts: u32,
        transaction: Option<Transaction>,
    },
}

impl WatchOutcome {
    pub fn hash(&self) -> H256 {
        match self {
            WatchOutcome::Confirmed { receipt, .. } | WatchOutcome::Reverted { receipt, .. } => {
                receipt.transaction_hash
            }
            WatchOutcome::Exhausted { hash, .. } => *hash,
        }
    }

    /// Tracked transaction after resolution, if the hash belonged to one
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            WatchOutcome::Confirmed { transaction, .. }
            | WatchOutcome::Reverted { transaction, .. }
            | WatchOutcome::Exhausted { transaction, .. } => transaction.as_ref(),
        }
    }
}

/// Callback run once when a watcher resolves or is exhausted
pub type ResolutionListener = Box<dyn FnOnce(WatchOutcome) + Send + Sync + 'static>;
