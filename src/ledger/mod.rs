//! Ledger-facing collaborators
//!
//! This module provides:
//! - The `LedgerClient` and `Signer` seams the core consumes
//! - An ethers-rs JSON-RPC ledger client with automatic failover
//! - A local-wallet signer

pub mod provider;
pub mod signer;

pub use provider::EthersLedger;
pub use signer::WalletSigner;

use crate::error::{LedgerError, SignerError};
use crate::types::{GasPrice, Receipt, SignedPayload, UnsignedTransaction};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

/// Remote ledger node the manager submits to and polls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Broadcast a signed payload, returning the ledger-assigned hash
    async fn submit(&self, payload: &SignedPayload) -> Result<H256, LedgerError>;

    /// Receipt for `hash`, `None` while the transaction is not yet mined
    async fn get_receipt(&self, hash: H256) -> Result<Option<Receipt>, LedgerError>;

    async fn estimate_gas(&self, tx: &UnsignedTransaction) -> Result<U256, LedgerError>;

    async fn get_fee_parameters(&self) -> Result<GasPrice, LedgerError>;

    /// Pending transaction count for `address`
    async fn get_nonce(&self, address: Address) -> Result<u64, LedgerError>;
}

/// Signs transactions. Key material stays behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedPayload, SignerError>;
}
