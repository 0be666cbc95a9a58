//! Pending set and history behind a single serialization point

use super::history::HistoryStore;
use super::store::KeyValueStore;
use crate::error::{TxManagerError, TxManagerResult};
use crate::types::{ExportFormat, HistoryFilter, Transaction, TxStatus};

use ethers::types::H256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Mutable lifecycle state. Only reachable through `TxBook::lock`.
pub struct BookInner {
    pending: HashMap<String, Transaction>,
    history: HistoryStore,
}

impl BookInner {
    pub fn insert_pending(&mut self, tx: Transaction) {
        debug!(tx_id = %tx.id, nonce = tx.nonce, "Tracking pending transaction");
        self.pending.insert(tx.id.clone(), tx);
    }

    pub fn pending(&self, id: &str) -> Option<&Transaction> {
        self.pending.get(id)
    }

    pub fn pending_id_for_hash(&self, hash: H256) -> Option<String> {
        self.pending
            .values()
            .find(|tx| tx.hash == Some(hash))
            .map(|tx| tx.id.clone())
    }

    /// Move a pending transaction into history after applying a terminal transition.
    ///
    /// Returns the status it left and the updated copy, or `None` if `id` is not pending.
    /// A failed transition leaves the transaction pending.
    pub fn finalize<F>(&mut self, id: &str, transition: F) -> TxManagerResult<Option<(TxStatus, Transaction)>>
    where
        F: FnOnce(&mut Transaction) -> TxManagerResult<()>,
    {
        let Some(mut tx) = self.pending.remove(id) else {
            return Ok(None);
        };

        let previous = tx.status;
        if let Err(e) = transition(&mut tx) {
            self.pending.insert(tx.id.clone(), tx);
            return Err(e);
        }
        if !tx.status.is_terminal() {
            let id = tx.id.clone();
            self.pending.insert(id.clone(), tx);
            return Err(TxManagerError::InvalidStateTransition {
                tx_id: id,
                from: previous.to_string(),
                to: TxStatus::Pending.to_string(),
            });
        }

        self.history.record(tx.clone());
        crate::metrics::record_history_size(self.history.len());
        Ok(Some((previous, tx)))
    }

    /// Record a transaction that never entered the pending set
    pub fn record_terminal(&mut self, tx: Transaction) {
        self.pending.remove(&tx.id);
        self.history.record(tx);
        crate::metrics::record_history_size(self.history.len());
    }

    /// Pending transactions, oldest first
    pub fn pending_snapshot(&self) -> Vec<Transaction> {
        let mut txs: Vec<_> = self.pending.values().cloned().collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.nonce.cmp(&b.nonce)));
        txs
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

/// Owner of the pending set and the history store
pub struct TxBook {
    inner: Mutex<BookInner>,
    store: Arc<dyn KeyValueStore>,
    history_key: String,
    /// Serializes persistence writes so a stale snapshot never lands last
    persist_lock: Mutex<()>,
}

impl TxBook {
    pub fn new(history_limit: usize, store: Arc<dyn KeyValueStore>, user_id: &str) -> Self {
        Self {
            inner: Mutex::new(BookInner {
                pending: HashMap::new(),
                history: HistoryStore::new(history_limit),
            }),
            store,
            history_key: format!("tx_history:{}", user_id),
            persist_lock: Mutex::new(()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, BookInner> {
        self.inner.lock().await
    }

    pub fn history_key(&self) -> &str {
        &self.history_key
    }

    /// Load persisted history, keeping anything recorded since startup on top
    pub async fn restore(&self) -> TxManagerResult<usize> {
        let Some(blob) = self.store.get(&self.history_key).await? else {
            return Ok(0);
        };

        let persisted: Vec<Transaction> =
            serde_json::from_slice(&blob).map_err(|e| TxManagerError::Persistence {
                key: self.history_key.clone(),
                message: format!("Corrupt history blob: {}", e),
            })?;

        let mut inner = self.inner.lock().await;
        let recent = inner.history.snapshot();
        inner.history.restore(persisted);
        for tx in recent.into_iter().rev() {
            inner.history.record(tx);
        }
        let restored = inner.history.len();
        crate::metrics::record_history_size(restored);

        info!(key = %self.history_key, entries = restored, "Restored transaction history");
        Ok(restored)
    }

    /// Write the current history to the store
    pub async fn try_persist(&self) -> TxManagerResult<()> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = self.inner.lock().await.history.snapshot();
        let blob = serde_json::to_vec(&snapshot).map_err(|e| TxManagerError::Persistence {
            key: self.history_key.clone(),
            message: e.to_string(),
        })?;

        self.store.set(&self.history_key, blob).await
    }

    /// Persist history; failures are logged and in-memory state stays authoritative
    pub async fn persist(&self) {
        if let Err(e) = self.try_persist().await {
            warn!(key = %self.history_key, error = %e, "Failed to persist transaction history");
        }
    }

    pub async fn pending_snapshot(&self) -> Vec<Transaction> {
        self.inner.lock().await.pending_snapshot()
    }

    pub async fn query_history(&self, filter: &HistoryFilter) -> Vec<Transaction> {
        self.inner.lock().await.history.query(filter)
    }

    pub async fn export_history(&self, format: ExportFormat) -> TxManagerResult<String> {
        self.inner.lock().await.history.export(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::{MemoryStore, MockKeyValueStore};
    use crate::types::{GasPrice, TxKind};
    use chrono::Utc;
    use ethers::types::{Address, U256};

    fn pending_tx(id: &str, nonce: u64) -> Transaction {
        Transaction {
            id: id.to_string(),
            hash: Some(H256::from_low_u64_be(nonce + 1)),
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            value: U256::zero(),
            data: None,
            chain_id: 1,
            nonce,
            gas_limit: U256::from(21_000u64),
            gas_price: GasPrice::legacy(1u64),
            status: TxStatus::Pending,
            block_number: None,
            confirmations: 0,
            created_at: Utc::now(),
            fee: U256::from(21_000u64),
            error: None,
            kind: TxKind::Transfer,
            replaces: None,
        }
    }

    #[tokio::test]
    async fn test_finalize_moves_to_history() {
        let book = TxBook::new(10, Arc::new(MemoryStore::new()), "alice");
        let mut inner = book.lock().await;
        inner.insert_pending(pending_tx("a", 0));

        let (from, tx) = inner
            .finalize("a", |tx| tx.confirm(12, 1))
            .unwrap()
            .unwrap();
        assert_eq!(from, TxStatus::Pending);
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert!(inner.pending("a").is_none());
        assert_eq!(inner.history().len(), 1);

        // Second finalize is a no-op, no duplicate history entry
        assert!(inner.finalize("a", |tx| tx.fail("x")).unwrap().is_none());
        assert_eq!(inner.history().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_transition_keeps_pending() {
        let book = TxBook::new(10, Arc::new(MemoryStore::new()), "alice");
        let mut inner = book.lock().await;
        inner.insert_pending(pending_tx("a", 0));

        let result = inner.finalize("a", |_| Ok(()));
        assert!(result.is_err());
        assert!(inner.pending("a").is_some());
        assert!(inner.history().is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let book = TxBook::new(10, store.clone(), "alice");
        {
            let mut inner = book.lock().await;
            inner.insert_pending(pending_tx("a", 0));
            inner.finalize("a", |tx| tx.confirm(1, 1)).unwrap();
        }
        book.try_persist().await.unwrap();

        let restored = TxBook::new(10, store, "alice");
        assert_eq!(restored.restore().await.unwrap(), 1);
        let history = restored.query_history(&HistoryFilter::default()).await;
        assert_eq!(history[0].id, "a");
        assert_eq!(history[0].status, TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let mut store = MockKeyValueStore::new();
        store.expect_set().returning(|key, _| {
            Err(TxManagerError::Persistence {
                key: key.to_string(),
                message: "disk full".to_string(),
            })
        });

        let book = TxBook::new(10, Arc::new(store), "alice");
        {
            let mut inner = book.lock().await;
            inner.record_terminal(pending_tx("a", 0));
        }

        assert!(book.try_persist().await.is_err());
        book.persist().await;
        assert_eq!(book.query_history(&HistoryFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_corrupt_blob() {
        let store = Arc::new(MemoryStore::new());
        store.set("tx_history:alice", b"not json".to_vec()).await.unwrap();

        let book = TxBook::new(10, store, "alice");
        let err = book.restore().await.unwrap_err();
        assert!(matches!(err, TxManagerError::Persistence { .. }));
    }
}
