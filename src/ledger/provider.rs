//! JSON-RPC ledger client with multi-RPC support and automatic failover

use super::LedgerClient;
use crate::config::{GasPriceStrategy, LedgerConfig};
use crate::error::{LedgerError, TxManagerError, TxManagerResult};
use crate::types::{GasPrice, Receipt, SignedPayload, UnsignedTransaction};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider ledger client with automatic failover
pub struct EthersLedger {
    /// Ledger configuration
    config: LedgerConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl EthersLedger {
    /// Create a new ledger client
    pub fn new(config: LedgerConfig) -> TxManagerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TxManagerError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> Result<u64, LedgerError> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(LedgerError::Rpc("All providers failed".to_string()))
    }

    /// Estimate EIP-1559 fees from the latest base fee
    async fn estimate_eip1559_fees(&self) -> Result<(U256, U256), LedgerError> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| {
                self.failover();
                LedgerError::Rpc(e.to_string())
            })?
            .ok_or_else(|| LedgerError::MalformedResponse("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| LedgerError::MalformedResponse("No base fee in block".to_string()))?;

        // 2 gwei tip
        let priority_fee = U256::from(2_000_000_000u64);

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, std::cmp::min(priority_fee, max_fee)))
    }
}

#[async_trait]
impl LedgerClient for EthersLedger {
    async fn submit(&self, payload: &SignedPayload) -> Result<H256, LedgerError> {
        match self.http().send_raw_transaction(payload.0.clone()).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => match RpcError::as_error_response(&e) {
                Some(resp) => Err(LedgerError::Rejected(resp.message.clone())),
                None => {
                    // Transport failure, the node never judged the payload
                    self.failover();
                    Err(LedgerError::Rpc(e.to_string()))
                }
            },
        }
    }

    async fn get_receipt(&self, hash: H256) -> Result<Option<Receipt>, LedgerError> {
        let receipt = match self.http().get_transaction_receipt(hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.failover();
                return Err(LedgerError::Rpc(e.to_string()));
            }
        };

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Receipts without a block are still pending inclusion
        let Some(block_number) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(None);
        };
        let status = receipt.status.ok_or_else(|| {
            LedgerError::MalformedResponse(format!("Receipt for {:?} has no status", hash))
        })?;

        let confirmations = match self.get_block_number().await {
            Ok(head) => head.saturating_sub(block_number) + 1,
            Err(_) => 1,
        };

        Ok(Some(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number,
            success: status == U64::from(1),
            gas_used: receipt.gas_used.unwrap_or_default(),
            confirmations,
        }))
    }

    async fn estimate_gas(&self, tx: &UnsignedTransaction) -> Result<U256, LedgerError> {
        // Gas, price and nonce are left unset so they cannot cap the estimate
        let request = TransactionRequest::new()
            .from(tx.from)
            .to(tx.to)
            .value(tx.value)
            .data(tx.data.clone().unwrap_or_default());
        self.http()
            .estimate_gas(&TypedTransaction::Legacy(request), None)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn get_fee_parameters(&self) -> Result<GasPrice, LedgerError> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                for _ in 0..self.http_providers.len() {
                    match self.http().get_gas_price().await {
                        Ok(price) => return Ok(GasPrice::legacy(price)),
                        Err(e) => {
                            warn!("Failed to get gas price from chain {}: {}", self.config.chain_id, e);
                            self.failover();
                        }
                    }
                }
                Err(LedgerError::Rpc("All providers failed".to_string()))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::eip1559(max_fee, priority_fee))
            }
        }
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, LedgerError> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(count) => return Ok(count.as_u64()),
                Err(e) => {
                    warn!("Failed to get nonce from chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(LedgerError::Rpc("All providers failed".to_string()))
    }
}

/// Build the ethers typed transaction matching the gas model
pub(crate) fn typed_transaction(tx: &UnsignedTransaction) -> TypedTransaction {
    let data = tx.data.clone().unwrap_or_default();

    match tx.gas_price {
        GasPrice::Legacy { gas_price } => {
            let request = TransactionRequest::new()
                .from(tx.from)
                .to(tx.to)
                .value(tx.value)
                .data(data)
                .nonce(tx.nonce)
                .gas(tx.gas_limit)
                .gas_price(gas_price)
                .chain_id(tx.chain_id);
            TypedTransaction::Legacy(request)
        }
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let request = Eip1559TransactionRequest::new()
                .from(tx.from)
                .to(tx.to)
                .value(tx.value)
                .data(data)
                .nonce(tx.nonce)
                .gas(tx.gas_limit)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .chain_id(tx.chain_id);
            TypedTransaction::Eip1559(request)
        }
    }
}
