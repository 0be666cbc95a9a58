//! Transaction submission: validate, price, sign, broadcast, track

use super::gas::FeeEstimator;
use super::nonce::NonceTracker;
use crate::error::{TxManagerError, TxManagerResult};
use crate::events::{EventBus, TxEvent};
use crate::ledger::{LedgerClient, Signer};
use crate::notify::{self, FeeNotifier};
use crate::state::TxBook;
use crate::types::{GasPrice, Transaction, TxKind, TxOptions, TxStatus, UnsignedTransaction};
use crate::watcher::WatcherPool;

use chrono::Utc;
use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

lazy_static! {
    static ref ADDRESS: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
    static ref ETHER_AMOUNT: Regex = Regex::new(r"^[0-9]+(\.[0-9]{1,18})?$").unwrap();
}

/// Validated submission, ready for nonce and gas resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TxDraft {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Option<Bytes>,
    pub chain_id: u64,
    pub nonce: Option<u64>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<GasPrice>,
    pub kind: TxKind,
    pub replaces: Option<String>,
}

/// A pending transaction the new submission takes over from
#[derive(Debug, Clone)]
pub struct Supersede {
    pub original_id: String,
    pub reason: String,
}

/// Fee-distribution hook fired after each accepted submission
#[derive(Clone)]
pub struct FeeDistribution {
    pub notifier: Arc<dyn FeeNotifier>,
    pub policy: String,
}

/// Builds, signs and broadcasts transactions, then hands them to the watchers
pub struct TransactionSubmitter {
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn Signer>,
    nonces: Arc<NonceTracker>,
    fees: Arc<FeeEstimator>,
    book: Arc<TxBook>,
    watchers: Arc<WatcherPool>,
    events: EventBus,
    default_chain_id: Option<u64>,
    fallback_gas_limit: bool,
    fee_distribution: Option<FeeDistribution>,
}

impl TransactionSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn Signer>,
        nonces: Arc<NonceTracker>,
        fees: Arc<FeeEstimator>,
        book: Arc<TxBook>,
        watchers: Arc<WatcherPool>,
        events: EventBus,
        default_chain_id: Option<u64>,
        fallback_gas_limit: bool,
        fee_distribution: Option<FeeDistribution>,
    ) -> Self {
        Self {
            ledger,
            signer,
            nonces,
            fees,
            book,
            watchers,
            events,
            default_chain_id,
            fallback_gas_limit,
            fee_distribution,
        }
    }

    /// Validate caller input. No network calls are made.
    pub fn prepare(
        &self,
        from: &str,
        to: &str,
        value: &str,
        data: Option<&str>,
        options: TxOptions,
    ) -> TxManagerResult<TxDraft> {
        let from = parse_address(from)?;
        let to = parse_address(to)?;
        let value = parse_value(value)?;
        let data = data.map(parse_data).transpose()?.flatten();
        let chain_id = self.resolve_chain_id(options.chain_id)?;

        if let Some(gas_limit) = options.gas_limit {
            if gas_limit.is_zero() {
                return Err(TxManagerError::Validation("Gas limit must be positive".to_string()));
            }
        }

        Ok(TxDraft {
            from,
            to,
            value,
            data,
            chain_id,
            nonce: options.nonce,
            gas_limit: options.gas_limit,
            gas_price: options.gas_price,
            kind: TxKind::Transfer,
            replaces: None,
        })
    }

    pub fn resolve_chain_id(&self, requested: Option<u64>) -> TxManagerResult<u64> {
        match requested.or(self.default_chain_id) {
            Some(0) => Err(TxManagerError::Validation("Chain id must be non-zero".to_string())),
            Some(chain_id) => Ok(chain_id),
            None => Err(TxManagerError::Validation("No chain id supplied or configured".to_string())),
        }
    }

    /// Validate and submit a transfer
    pub async fn submit(
        &self,
        from: &str,
        to: &str,
        value: &str,
        data: Option<&str>,
        options: TxOptions,
    ) -> TxManagerResult<Transaction> {
        let draft = self.prepare(from, to, value, data, options)?;
        self.submit_draft(draft, None).await
    }

    /// Submit a validated draft.
    ///
    /// With `supersedes`, the original is moved to history as failed in the
    /// same critical section that records this transaction as pending.
    #[instrument(skip(self, draft, supersedes), fields(from = ?draft.from, kind = draft.kind.as_str()))]
    pub async fn submit_draft(
        &self,
        draft: TxDraft,
        supersedes: Option<Supersede>,
    ) -> TxManagerResult<Transaction> {
        let nonce = self
            .nonces
            .next_nonce(draft.chain_id, draft.from, draft.nonce)
            .await;

        let gas_price = match draft.gas_price {
            Some(price) => price,
            None => match self.fees.fee_parameters().await {
                Ok(price) => price,
                Err(e) => {
                    self.release_nonce(&draft, nonce).await;
                    return Err(e);
                }
            },
        };

        let mut unsigned = UnsignedTransaction {
            from: draft.from,
            to: draft.to,
            value: draft.value,
            data: draft.data.clone(),
            chain_id: draft.chain_id,
            nonce,
            gas_limit: draft.gas_limit.unwrap_or_default(),
            gas_price,
        };

        if draft.gas_limit.is_none() {
            unsigned.gas_limit = match self.fees.gas_limit(&unsigned).await {
                Ok(limit) => limit,
                Err(e) if self.fallback_gas_limit => {
                    let fallback = FeeEstimator::fallback_gas_limit(unsigned.data.as_ref());
                    warn!(error = %e, %fallback, "Gas estimation failed, using fallback limit");
                    fallback
                }
                Err(e) => {
                    self.release_nonce(&draft, nonce).await;
                    return Err(e);
                }
            };
        }

        let mut tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            hash: None,
            from: unsigned.from,
            to: unsigned.to,
            value: unsigned.value,
            data: unsigned.data.clone(),
            chain_id: unsigned.chain_id,
            nonce,
            gas_limit: unsigned.gas_limit,
            gas_price,
            status: TxStatus::Pending,
            block_number: None,
            confirmations: 0,
            created_at: Utc::now(),
            fee: gas_price.total_cost(unsigned.gas_limit),
            error: None,
            kind: draft.kind,
            replaces: draft.replaces.clone(),
        };

        debug!(tx_id = %tx.id, nonce, gas_limit = %tx.gas_limit, fee = %tx.fee, "Signing transaction");

        let payload = match self.signer.sign(&unsigned).await {
            Ok(payload) => payload,
            Err(e) => {
                let message = e.to_string();
                self.release_nonce(&draft, nonce).await;
                let tx_id = tx.id.clone();
                self.record_rejected(tx, &message).await;
                return Err(TxManagerError::Signing { tx_id, message });
            }
        };

        let hash = match self.ledger.submit(&payload).await {
            Ok(hash) => hash,
            Err(e) => {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("nonce too low") || lowered.contains("already known") {
                    self.nonces.reset(tx.chain_id, tx.from);
                } else {
                    if lowered.contains("underpriced") {
                        self.fees.invalidate().await;
                    }
                    self.release_nonce(&draft, nonce).await;
                }

                let tx_id = tx.id.clone();
                self.record_rejected(tx, &message).await;
                return Err(TxManagerError::Submission { tx_id, message });
            }
        };
        tx.set_hash(hash)?;

        let superseded = {
            let mut book = self.book.lock().await;
            let superseded = match supersedes {
                Some(ref s) => {
                    match book.finalize(&s.original_id, |original| original.fail(s.reason.clone())) {
                        Ok(done) => done,
                        Err(e) => {
                            warn!(tx_id = %s.original_id, error = %e, "Failed to retire superseded transaction");
                            None
                        }
                    }
                }
                None => None,
            };
            book.insert_pending(tx.clone());
            superseded
        };

        self.nonces.observe(tx.chain_id, tx.from, nonce).await;
        self.watchers.register(hash, None);

        info!(
            tx_id = %tx.id,
            ?hash,
            nonce,
            chain_id = tx.chain_id,
            fee = %tx.fee,
            "Transaction submitted"
        );

        if let Some((from, original)) = superseded {
            self.book.persist().await;
            self.events.publish(TxEvent::state_changed(from, &original));
        }
        self.events.publish(TxEvent::Submitted {
            transaction: tx.clone(),
        });

        if let Some(ref distribution) = self.fee_distribution {
            notify::dispatch(
                distribution.notifier.clone(),
                tx.fee,
                distribution.policy.clone(),
                tx.id.clone(),
            );
        }

        Ok(tx)
    }

    /// Hand back a nonce this submission reserved itself
    async fn release_nonce(&self, draft: &TxDraft, nonce: u64) {
        if draft.nonce.is_none() {
            self.nonces.release(draft.chain_id, draft.from, nonce).await;
        }
    }

    /// Move a never-accepted transaction straight into history as failed
    async fn record_rejected(&self, mut tx: Transaction, message: &str) {
        warn!(tx_id = %tx.id, nonce = tx.nonce, error = message, "Transaction rejected");

        // Fresh transaction, always pending here
        let _ = tx.fail(message);
        self.book.lock().await.record_terminal(tx.clone());
        self.book.persist().await;
        self.events.publish(TxEvent::state_changed(TxStatus::Pending, &tx));
    }
}

/// Parse a `0x`-prefixed hex address, enforcing EIP-55 when mixed-case
pub fn parse_address(raw: &str) -> TxManagerResult<Address> {
    if !ADDRESS.is_match(raw) {
        return Err(TxManagerError::Validation(format!("Invalid address: {}", raw)));
    }

    let digits = &raw[2..];
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());

    let address: Address = raw
        .parse()
        .map_err(|_| TxManagerError::Validation(format!("Invalid address: {}", raw)))?;

    if has_lower && has_upper && ethers::utils::to_checksum(&address, None) != raw {
        return Err(TxManagerError::Validation(format!(
            "Address checksum mismatch: {}",
            raw
        )));
    }

    Ok(address)
}

/// Parse a non-negative decimal ether amount into wei
pub fn parse_value(raw: &str) -> TxManagerResult<U256> {
    let raw = raw.trim();
    if !ETHER_AMOUNT.is_match(raw) {
        return Err(TxManagerError::Validation(format!("Invalid value: {}", raw)));
    }

    ethers::utils::parse_ether(raw)
        .map_err(|e| TxManagerError::Validation(format!("Invalid value {}: {}", raw, e)))
}

/// Parse optional hex payload. `0x` alone means no payload.
pub fn parse_data(raw: &str) -> TxManagerResult<Option<Bytes>> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(None);
    }

    hex::decode(digits)
        .map(|bytes| Some(Bytes::from(bytes)))
        .map_err(|e| TxManagerError::Validation(format!("Invalid data hex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_parse_address() {
        assert!(parse_address(CHECKSUMMED).is_ok());
        assert!(parse_address(&CHECKSUMMED.to_lowercase()).is_ok());
        assert!(parse_address(&format!("0x{}", CHECKSUMMED[2..].to_uppercase())).is_ok());

        // Single flipped letter breaks the checksum
        let broken = CHECKSUMMED.replacen("f39F", "f39f", 1);
        assert!(matches!(parse_address(&broken), Err(TxManagerError::Validation(_))));

        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("f39fd6e51aad88f6f4ce6ab8827279cfffb92266").is_err());
        assert!(parse_address("0xzz9fd6e51aad88f6f4ce6ab8827279cfffb92266").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.0").unwrap(), U256::exp10(18));
        assert_eq!(parse_value("0").unwrap(), U256::zero());
        assert_eq!(parse_value("0.000000000000000001").unwrap(), U256::one());
        assert!(parse_value("-1").is_err());
        assert!(parse_value("abc").is_err());
        assert!(parse_value("1.").is_err());
        assert!(parse_value("0.0000000000000000001").is_err());
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(parse_data("0x").unwrap(), None);
        assert_eq!(
            parse_data("0xa9059cbb").unwrap(),
            Some(Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]))
        );
        assert!(parse_data("0xabc").is_err());
        assert!(parse_data("0xzz").is_err());
    }
}
