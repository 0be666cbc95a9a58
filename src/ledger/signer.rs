//! Local-wallet signer

use super::provider::typed_transaction;
use super::Signer;
use crate::error::{SignerError, TxManagerError, TxManagerResult};
use crate::types::{SignedPayload, UnsignedTransaction};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as _};
use ethers::types::Address;
use tracing::info;

/// Signs with a private key held in process memory
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Load wallet from the environment variable named `key_env`
    pub fn from_env(key_env: &str) -> TxManagerResult<Self> {
        let key = std::env::var(key_env).map_err(|_| {
            TxManagerError::Config(format!(
                "No wallet configured. Set {} to a hex private key",
                key_env
            ))
        })?;

        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| TxManagerError::Config(format!("Invalid private key: {}", e)))?;

        info!("Wallet signer initialized for {:?}", wallet.address());
        Ok(Self::new(wallet))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl Signer for WalletSigner {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedPayload, SignerError> {
        if tx.from != self.wallet.address() {
            return Err(SignerError(format!(
                "Signer holds {:?}, cannot sign for {:?}",
                self.wallet.address(),
                tx.from
            )));
        }

        let typed = typed_transaction(tx);
        let wallet = self.wallet.clone().with_chain_id(tx.chain_id);

        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| SignerError(e.to_string()))?;

        Ok(SignedPayload(typed.rlp_signed(&signature)))
    }
}
