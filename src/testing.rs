//! Scriptable ledger and signer doubles for lifecycle tests

use crate::config::ManagerConfig;
use crate::error::{LedgerError, SignerError};
use crate::events::EventBus;
use crate::ledger::{LedgerClient, Signer};
use crate::state::{MemoryStore, TxBook};
use crate::tx::{FeeEstimator, NonceTracker, TransactionSubmitter};
use crate::types::{GasPrice, Receipt, SignedPayload, UnsignedTransaction};
use crate::watcher::WatcherPool;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const ALICE: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const BOB: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const CAROL: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

/// In-memory ledger. Payloads come from `AcceptingSigner` and carry their nonce.
pub struct FakeLedger {
    pending_count: AtomicU64,
    fee_parameters: GasPrice,
    fail_estimates: AtomicBool,
    submissions: AtomicU64,
    calls: AtomicU64,
    rejections: Mutex<VecDeque<String>>,
    rejections_at: Mutex<HashMap<u64, String>>,
    accepted: Mutex<HashSet<H256>>,
    receipts: Mutex<HashMap<H256, Receipt>>,
    receipt_calls: Mutex<HashMap<H256, u32>>,
}

impl FakeLedger {
    pub fn new(pending_count: u64, fee_parameters: GasPrice) -> Self {
        Self {
            pending_count: AtomicU64::new(pending_count),
            fee_parameters,
            fail_estimates: AtomicBool::new(false),
            submissions: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            rejections: Mutex::new(VecDeque::new()),
            rejections_at: Mutex::new(HashMap::new()),
            accepted: Mutex::new(HashSet::new()),
            receipts: Mutex::new(HashMap::new()),
            receipt_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Reject the next submission with `message`
    pub fn reject_next(&self, message: &str) {
        self.rejections.lock().unwrap().push_back(message.to_string());
    }

    /// Reject the submission with zero-based call index `index`
    pub fn reject_at(&self, index: u64, message: &str) {
        self.rejections_at
            .lock()
            .unwrap()
            .insert(index, message.to_string());
    }

    pub fn fail_gas_estimates(&self) {
        self.fail_estimates.store(true, Ordering::SeqCst);
    }

    /// Make a receipt available for `hash`
    pub fn mine(&self, hash: H256, success: bool, block_number: u64) {
        self.receipts.lock().unwrap().insert(
            hash,
            Receipt {
                transaction_hash: hash,
                block_number,
                success,
                gas_used: U256::from(21_000u64),
                confirmations: 1,
            },
        );
    }

    pub fn submitted_count(&self) -> usize {
        self.accepted.lock().unwrap().len()
    }

    pub fn receipt_calls(&self, hash: H256) -> u32 {
        self.receipt_calls
            .lock()
            .unwrap()
            .get(&hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn submit(&self, payload: &SignedPayload) -> Result<H256, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.rejections.lock().unwrap().pop_front() {
            return Err(LedgerError::Rejected(message));
        }
        if let Some(message) = self.rejections_at.lock().unwrap().remove(&index) {
            return Err(LedgerError::Rejected(message));
        }

        let nonce_bytes: [u8; 8] = payload.0[..8]
            .try_into()
            .map_err(|_| LedgerError::Rejected("malformed payload".to_string()))?;
        let nonce = u64::from_be_bytes(nonce_bytes);
        self.pending_count.fetch_max(nonce + 1, Ordering::SeqCst);

        let hash = H256::from_low_u64_be(0x1000 + index);
        self.accepted.lock().unwrap().insert(hash);
        Ok(hash)
    }

    async fn get_receipt(&self, hash: H256) -> Result<Option<Receipt>, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.receipt_calls.lock().unwrap().entry(hash).or_insert(0) += 1;
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn estimate_gas(&self, tx: &UnsignedTransaction) -> Result<U256, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_estimates.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("execution reverted".to_string()));
        }
        match tx.data {
            Some(ref data) if !data.is_empty() => Ok(U256::from(60_000u64)),
            _ => Ok(U256::from(21_000u64)),
        }
    }

    async fn get_fee_parameters(&self) -> Result<GasPrice, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fee_parameters)
    }

    async fn get_nonce(&self, _address: Address) -> Result<u64, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Let overlapping submissions interleave here, like a network round trip
        tokio::task::yield_now().await;
        Ok(self.pending_count.load(Ordering::SeqCst))
    }
}

/// Signs anything; the payload is the nonce followed by the sender
pub struct AcceptingSigner;

#[async_trait]
impl Signer for AcceptingSigner {
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedPayload, SignerError> {
        let mut payload = tx.nonce.to_be_bytes().to_vec();
        payload.extend_from_slice(tx.from.as_bytes());
        Ok(SignedPayload(Bytes::from(payload)))
    }
}

/// Submission pipeline wired over a `FakeLedger`, for component tests
pub struct Harness {
    pub ledger: Arc<FakeLedger>,
    pub book: Arc<TxBook>,
    pub events: EventBus,
    pub nonces: Arc<NonceTracker>,
    pub watchers: Arc<WatcherPool>,
    pub submitter: Arc<TransactionSubmitter>,
}

impl Harness {
    pub fn new(ledger: Arc<FakeLedger>, config: &ManagerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let book = Arc::new(TxBook::new(
            config.history_limit,
            Arc::new(MemoryStore::new()),
            &config.user_id,
        ));
        let nonces = Arc::new(NonceTracker::new(ledger.clone()));
        let fees = Arc::new(FeeEstimator::new(ledger.clone(), config));
        let watchers = Arc::new(WatcherPool::new(
            ledger.clone(),
            book.clone(),
            events.clone(),
            config,
        ));
        let submitter = Arc::new(TransactionSubmitter::new(
            ledger.clone(),
            Arc::new(AcceptingSigner),
            nonces.clone(),
            fees,
            book.clone(),
            watchers.clone(),
            events.clone(),
            config.default_chain_id.or(Some(1)),
            config.fallback_gas_limit,
            None,
        ));

        Self {
            ledger,
            book,
            events,
            nonces,
            watchers,
            submitter,
        }
    }
}
