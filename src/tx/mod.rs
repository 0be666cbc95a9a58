//! Transaction submission with nonce management, fee estimation and replacement

mod batch;
mod gas;
mod nonce;
mod replacement;
mod submitter;

pub use batch::BatchCoordinator;
pub use gas::{FeeEstimator, CALL_GAS_LIMIT, TRANSFER_GAS_LIMIT};
pub use nonce::NonceTracker;
pub use replacement::ReplacementEngine;
pub use submitter::{
    parse_address, parse_data, parse_value, FeeDistribution, Supersede, TransactionSubmitter,
    TxDraft,
};
