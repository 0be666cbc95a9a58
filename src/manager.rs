//! Transaction manager facade
//!
//! Wires the nonce tracker, fee estimator, submitter, watcher pool,
//! replacement engine, batch coordinator and history store around injected
//! ledger, signer and storage collaborators.

use crate::config::ManagerConfig;
use crate::error::{TxManagerError, TxManagerResult};
use crate::events::{EventBus, TxEvent};
use crate::ledger::{LedgerClient, Signer};
use crate::state::{KeyValueStore, TxBook};
use crate::tx::{
    parse_address, parse_data, parse_value, BatchCoordinator, FeeDistribution, FeeEstimator,
    NonceTracker, ReplacementEngine, TransactionSubmitter,
};
use crate::types::{
    multiplier_permille, BatchItem, ExportFormat, GasEstimate, HistoryFilter, Transaction,
    TransactionBatch, TxOptions,
};
use crate::watcher::{WatchOutcome, WatcherPool};

use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Client-side lifecycle manager for one wallet user
pub struct TxManager {
    config: ManagerConfig,
    book: Arc<TxBook>,
    events: EventBus,
    fees: Arc<FeeEstimator>,
    watchers: Arc<WatcherPool>,
    submitter: Arc<TransactionSubmitter>,
    replacements: ReplacementEngine,
    batches: BatchCoordinator,
}

impl TxManager {
    pub fn new(
        config: ManagerConfig,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn Signer>,
        store: Arc<dyn KeyValueStore>,
        fee_distribution: Option<FeeDistribution>,
    ) -> TxManagerResult<Self> {
        config
            .validate()
            .map_err(|e| TxManagerError::Config(e.to_string()))?;
        multiplier_permille(config.cancel_multiplier)
            .and(multiplier_permille(config.speed_up_multiplier))
            .map_err(|e| TxManagerError::Config(e.to_string()))?;

        let events = EventBus::new(config.event_capacity);
        let book = Arc::new(TxBook::new(config.history_limit, store, &config.user_id));
        let nonces = Arc::new(NonceTracker::new(ledger.clone()));
        let fees = Arc::new(FeeEstimator::new(ledger.clone(), &config));
        let watchers = Arc::new(WatcherPool::new(
            ledger.clone(),
            book.clone(),
            events.clone(),
            &config,
        ));

        let submitter = Arc::new(TransactionSubmitter::new(
            ledger,
            signer,
            nonces.clone(),
            fees.clone(),
            book.clone(),
            watchers.clone(),
            events.clone(),
            config.default_chain_id,
            config.fallback_gas_limit,
            fee_distribution,
        ));

        let replacements = ReplacementEngine::new(
            submitter.clone(),
            book.clone(),
            watchers.clone(),
            events.clone(),
            config.cancel_multiplier,
            config.speed_up_multiplier,
        );
        let batches = BatchCoordinator::new(submitter.clone(), nonces, config.batch_failure_policy);

        info!(
            user_id = %config.user_id,
            poll_interval_ms = config.poll_interval_ms,
            max_retries = config.max_retries,
            watch_window_secs = config.watch_window().as_secs(),
            history_limit = config.history_limit,
            "Transaction manager initialized"
        );

        Ok(Self {
            config,
            book,
            events,
            fees,
            watchers,
            submitter,
            replacements,
            batches,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Submit a transfer of `value` ether from `from` to `to`
    pub async fn submit(
        &self,
        from: &str,
        to: &str,
        value: &str,
        data: Option<&str>,
        options: TxOptions,
    ) -> TxManagerResult<Transaction> {
        self.submitter.submit(from, to, value, data, options).await
    }

    pub async fn submit_batch(
        &self,
        from: &str,
        items: Vec<BatchItem>,
    ) -> TxManagerResult<TransactionBatch> {
        self.batches.submit_batch(from, items).await
    }

    pub async fn cancel(&self, id: &str) -> TxManagerResult<Transaction> {
        self.replacements.cancel(id).await
    }

    pub async fn speed_up(&self, id: &str, multiplier: Option<f64>) -> TxManagerResult<Transaction> {
        self.replacements.speed_up(id, multiplier).await
    }

    /// Terminal transactions, most recent first
    pub async fn get_history(&self, filter: &HistoryFilter) -> Vec<Transaction> {
        self.book.query_history(filter).await
    }

    /// Estimate gas and cost without submitting
    pub async fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        value: &str,
        data: Option<&str>,
        chain_id: Option<u64>,
    ) -> TxManagerResult<GasEstimate> {
        let from = parse_address(from)?;
        let to = parse_address(to)?;
        let value = parse_value(value)?;
        let data = data.map(parse_data).transpose()?.flatten();
        let chain_id = self.submitter.resolve_chain_id(chain_id)?;

        self.fees
            .estimate(from, to, value, data.as_ref(), chain_id)
            .await
    }

    /// Watch `hash` and run `on_resolved` once it resolves or exhausts.
    ///
    /// Returns `false` if the hash was already watched; the callback is then
    /// attached to the existing watcher.
    pub fn watch<F>(&self, hash: H256, on_resolved: F) -> bool
    where
        F: FnOnce(WatchOutcome) + Send + Sync + 'static,
    {
        self.watchers.register(hash, Some(Box::new(on_resolved)))
    }

    /// Stop watching `hash`. Returns whether a watcher was stopped.
    pub fn stop_watching(&self, hash: H256) -> bool {
        self.watchers.stop(hash)
    }

    /// Consistent snapshot of the pending set
    pub async fn pending(&self) -> Vec<Transaction> {
        self.book.pending_snapshot().await
    }

    /// Look a transaction up in the pending set, then in history
    pub async fn get_transaction(&self, id: &str) -> Option<Transaction> {
        let book = self.book.lock().await;
        book.pending(id)
            .or_else(|| book.history().get(id))
            .cloned()
    }

    pub async fn export_history(&self, format: ExportFormat) -> TxManagerResult<String> {
        self.book.export_history(format).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    /// Load persisted history for this user
    pub async fn restore_history(&self) -> TxManagerResult<usize> {
        self.book.restore().await
    }

    pub fn active_watchers(&self) -> usize {
        self.watchers.active_count()
    }

    /// Stop every watcher and flush history
    pub async fn shutdown(&self) {
        self.watchers.shutdown();
        self.book.persist().await;
        info!("Transaction manager shut down");
    }
}
