//! Domain types shared across the transaction lifecycle

use crate::error::{TxManagerError, TxManagerResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gas pricing model. Legacy and EIP-1559 pricing are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GasPrice {
    Legacy { gas_price: U256 },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    pub fn legacy(gas_price: impl Into<U256>) -> Self {
        GasPrice::Legacy {
            gas_price: gas_price.into(),
        }
    }

    pub fn eip1559(max_fee_per_gas: impl Into<U256>, max_priority_fee_per_gas: impl Into<U256>) -> Self {
        GasPrice::Eip1559 {
            max_fee_per_gas: max_fee_per_gas.into(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.into(),
        }
    }

    /// Price per gas unit used for cost computation
    pub fn effective_price(&self) -> U256 {
        match self {
            GasPrice::Legacy { gas_price } => *gas_price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }

    /// Total cost in wei for the given gas limit
    pub fn total_cost(&self, gas_limit: U256) -> U256 {
        gas_limit.saturating_mul(self.effective_price())
    }

    /// Scale every price component by `permille / 1000`
    pub fn scaled(&self, permille: u64) -> GasPrice {
        let scale = |v: U256| v.saturating_mul(U256::from(permille)) / U256::from(1000u64);
        match self {
            GasPrice::Legacy { gas_price } => GasPrice::Legacy {
                gas_price: scale(*gas_price),
            },
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: scale(*max_fee_per_gas),
                max_priority_fee_per_gas: scale(*max_priority_fee_per_gas),
            },
        }
    }

    /// Add a percentage buffer to every price component
    pub fn buffered(&self, percent: u64) -> GasPrice {
        self.scaled(1000 + percent * 10)
    }
}

/// Convert a float fee multiplier into parts per thousand
pub fn multiplier_permille(multiplier: f64) -> TxManagerResult<u64> {
    if !multiplier.is_finite() || multiplier <= 1.0 {
        return Err(TxManagerError::Validation(format!(
            "Fee multiplier must be greater than 1.0, got {}",
            multiplier
        )));
    }
    let permille = (multiplier * 1000.0).round() as u64;
    if permille <= 1000 {
        return Err(TxManagerError::Validation(format!(
            "Fee multiplier {} is below the 0.1% bump resolution",
            multiplier
        )));
    }
    Ok(permille)
}

/// Gas parameters for a prospective transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    pub total_cost: U256,
}

impl GasEstimate {
    pub fn new(gas_limit: U256, gas_price: GasPrice) -> Self {
        Self {
            gas_limit,
            gas_price,
            total_cost: gas_price.total_cost(gas_limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transaction was submitted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    #[default]
    Transfer,
    Cancel,
    SpeedUp,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::Cancel => "cancel",
            TxKind::SpeedUp => "speed_up",
        }
    }
}

/// A wallet transaction tracked from submission to a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub hash: Option<H256>,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Option<Bytes>,
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub created_at: DateTime<Utc>,
    pub fee: U256,
    pub error: Option<String>,
    #[serde(default)]
    pub kind: TxKind,
    #[serde(default)]
    pub replaces: Option<String>,
}

impl Transaction {
    /// Set the ledger-assigned hash. A hash, once set, never changes.
    pub fn set_hash(&mut self, hash: H256) -> TxManagerResult<()> {
        match self.hash {
            Some(existing) if existing != hash => Err(TxManagerError::Internal(format!(
                "Tx {} already has hash {:?}",
                self.id, existing
            ))),
            _ => {
                self.hash = Some(hash);
                Ok(())
            }
        }
    }

    pub fn confirm(&mut self, block_number: u64, confirmations: u64) -> TxManagerResult<()> {
        self.transition(TxStatus::Confirmed)?;
        self.block_number = Some(block_number);
        self.confirmations = confirmations;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> TxManagerResult<()> {
        self.transition(TxStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: TxStatus) -> TxManagerResult<()> {
        if self.status.is_terminal() {
            return Err(TxManagerError::InvalidStateTransition {
                tx_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Whether `address` (hex, any case, optional 0x) is the sender or recipient
    pub fn involves(&self, address: &str) -> bool {
        let needle = address.trim_start_matches("0x").trim_start_matches("0X").to_lowercase();
        hex::encode(self.from.as_bytes()) == needle || hex::encode(self.to.as_bytes()) == needle
    }
}

/// Validated transaction receipt produced at the ledger-client boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: U256,
    pub confirmations: u64,
}

/// Transaction as handed to the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Option<Bytes>,
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
}

/// Opaque signed payload ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload(pub Bytes);

/// Caller overrides for a submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    pub nonce: Option<u64>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<GasPrice>,
    pub chain_id: Option<u64>,
}

/// One entry of a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub to: String,
    pub value: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub options: TxOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    pub index: usize,
    pub error: String,
}

/// Ordered transactions submitted as one logical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub id: String,
    pub from: Address,
    pub transactions: Vec<Transaction>,
    pub total_value: U256,
    pub total_fee: U256,
    pub status: BatchStatus,
    pub failures: Vec<BatchItemFailure>,
    pub created_at: DateTime<Utc>,
}

/// History query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub address: Option<String>,
    pub status: Option<TxStatus>,
    pub chain_id: Option<u64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryFilter {
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(ref address) = self.address {
            if !tx.involves(address) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if tx.status != status {
                return false;
            }
        }
        if let Some(chain_id) = self.chain_id {
            if tx.chain_id != chain_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}
