//! Gas and fee estimation

use crate::config::ManagerConfig;
use crate::error::{TxManagerError, TxManagerResult};
use crate::ledger::LedgerClient;
use crate::types::{GasEstimate, GasPrice, UnsignedTransaction};

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Gas limit for a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Conservative gas limit for payload-bearing calls
pub const CALL_GAS_LIMIT: u64 = 100_000;

/// Gas estimator backed by the ledger
pub struct FeeEstimator {
    ledger: Arc<dyn LedgerClient>,
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    cache_ttl: Duration,
    cached_fees: RwLock<Option<(Instant, GasPrice)>>,
}

impl FeeEstimator {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: &ManagerConfig) -> Self {
        Self {
            ledger,
            gas_limit_buffer_percent: config.gas_limit_buffer_percent,
            gas_price_buffer_percent: config.gas_price_buffer_percent,
            cache_ttl: config.fee_cache_ttl(),
            cached_fees: RwLock::new(None),
        }
    }

    /// Estimate gas limit, fee parameters and total cost for a prospective transaction
    pub async fn estimate(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: Option<&Bytes>,
        chain_id: u64,
    ) -> TxManagerResult<GasEstimate> {
        let probe = UnsignedTransaction {
            from,
            to,
            value,
            data: data.cloned(),
            chain_id,
            nonce: 0,
            gas_limit: U256::zero(),
            gas_price: GasPrice::legacy(0u64),
        };

        let gas_limit = self.gas_limit(&probe).await?;
        let gas_price = self.fee_parameters().await?;

        let estimate = GasEstimate::new(gas_limit, gas_price);
        debug!(
            gas_limit = %estimate.gas_limit,
            total_cost = %estimate.total_cost,
            "Estimated fee"
        );
        Ok(estimate)
    }

    /// Ledger gas estimate plus the configured buffer
    pub async fn gas_limit(&self, tx: &UnsignedTransaction) -> TxManagerResult<U256> {
        let base_gas = self
            .ledger
            .estimate_gas(tx)
            .await
            .map_err(|e| TxManagerError::Estimation(format!("Gas limit query failed: {}", e)))?;

        let buffer = base_gas * self.gas_limit_buffer_percent / 100;
        Ok(base_gas + buffer)
    }

    /// Current fee parameters, served from cache while fresh
    pub async fn fee_parameters(&self) -> TxManagerResult<GasPrice> {
        if let Some((fetched_at, price)) = *self.cached_fees.read().await {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(price);
            }
        }

        let price = self
            .ledger
            .get_fee_parameters()
            .await
            .map_err(|e| TxManagerError::Estimation(format!("Fee parameter query failed: {}", e)))?
            .buffered(self.gas_price_buffer_percent);

        *self.cached_fees.write().await = Some((Instant::now(), price));
        Ok(price)
    }

    /// Drop cached fee parameters
    pub async fn invalidate(&self) {
        *self.cached_fees.write().await = None;
    }

    /// Default gas limit when the ledger cannot estimate
    pub fn fallback_gas_limit(data: Option<&Bytes>) -> U256 {
        match data {
            Some(data) if !data.is_empty() => U256::from(CALL_GAS_LIMIT),
            _ => U256::from(TRANSFER_GAS_LIMIT),
        }
    }

    /// Calculate bumped gas price for a replacement.
    ///
    /// Every component rises by at least 1 wei, so tiny prices still bump.
    pub fn bump_gas_price(current: &GasPrice, permille: u64) -> GasPrice {
        let raise = |old: U256, scaled: U256| scaled.max(old.saturating_add(U256::one()));
        match (*current, current.scaled(permille)) {
            (GasPrice::Legacy { gas_price: old }, GasPrice::Legacy { gas_price }) => GasPrice::Legacy {
                gas_price: raise(old, gas_price),
            },
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas: old_max,
                    max_priority_fee_per_gas: old_tip,
                },
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
            ) => GasPrice::Eip1559 {
                max_fee_per_gas: raise(old_max, max_fee_per_gas),
                max_priority_fee_per_gas: raise(old_tip, max_priority_fee_per_gas),
            },
            (_, scaled) => scaled,
        }
    }
}
