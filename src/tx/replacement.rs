//! Fee-bump replacement of stuck transactions

use super::gas::{FeeEstimator, TRANSFER_GAS_LIMIT};
use super::submitter::{Supersede, TransactionSubmitter, TxDraft};
use crate::error::{TxManagerError, TxManagerResult};
use crate::events::{EventBus, TxEvent};
use crate::state::TxBook;
use crate::types::{multiplier_permille, Transaction, TxKind};
use crate::watcher::WatcherPool;

use dashmap::DashSet;
use ethers::types::U256;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Builds cancel and speed-up replacements that reuse the original nonce
pub struct ReplacementEngine {
    submitter: Arc<TransactionSubmitter>,
    book: Arc<TxBook>,
    watchers: Arc<WatcherPool>,
    events: EventBus,
    cancel_multiplier: f64,
    speed_up_multiplier: f64,
    /// Ids with a replacement currently being submitted
    in_flight: DashSet<String>,
}

impl ReplacementEngine {
    pub fn new(
        submitter: Arc<TransactionSubmitter>,
        book: Arc<TxBook>,
        watchers: Arc<WatcherPool>,
        events: EventBus,
        cancel_multiplier: f64,
        speed_up_multiplier: f64,
    ) -> Self {
        Self {
            submitter,
            book,
            watchers,
            events,
            cancel_multiplier,
            speed_up_multiplier,
            in_flight: DashSet::new(),
        }
    }

    /// Replace `id` with a zero-value self transfer at a higher fee
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> TxManagerResult<Transaction> {
        let permille = multiplier_permille(self.cancel_multiplier)?;
        self.replace(id, TxKind::Cancel, permille).await
    }

    /// Resubmit `id` unchanged at a higher fee
    #[instrument(skip(self))]
    pub async fn speed_up(&self, id: &str, multiplier: Option<f64>) -> TxManagerResult<Transaction> {
        let permille = multiplier_permille(multiplier.unwrap_or(self.speed_up_multiplier))?;
        self.replace(id, TxKind::SpeedUp, permille).await
    }

    async fn replace(&self, id: &str, kind: TxKind, permille: u64) -> TxManagerResult<Transaction> {
        let original = self.claim(id).await?;
        let result = self.submit_replacement(&original, kind, permille).await;
        self.in_flight.remove(id);

        let reason = retirement_reason(kind);
        match result {
            Ok(replacement) => {
                info!(
                    original_id = %original.id,
                    replacement_id = %replacement.id,
                    nonce = replacement.nonce,
                    gas_price = %replacement.gas_price.effective_price(),
                    reason,
                    "Transaction replaced"
                );
                self.events.publish(TxEvent::Replaced {
                    original_id: original.id.clone(),
                    replacement_id: replacement.id.clone(),
                    reason: reason.to_string(),
                });
                Ok(replacement)
            }
            Err(e) => {
                warn!(tx_id = %original.id, error = %e, "Replacement failed, original stays pending");
                if let Some(hash) = original.hash {
                    self.watchers.register(hash, None);
                }
                Err(e)
            }
        }
    }

    /// Check the target is replaceable and stop its watcher, under the book lock
    async fn claim(&self, id: &str) -> TxManagerResult<Transaction> {
        let book = self.book.lock().await;

        let not_allowed = |reason: &str| TxManagerError::ReplacementNotAllowed {
            tx_id: id.to_string(),
            reason: reason.to_string(),
        };

        let original = match book.pending(id) {
            Some(tx) => tx.clone(),
            None if book.history().get(id).is_some() => return Err(not_allowed("already terminal")),
            None => return Err(not_allowed("not found")),
        };

        if !self.in_flight.insert(id.to_string()) {
            return Err(not_allowed("replacement in progress"));
        }

        if let Some(hash) = original.hash {
            self.watchers.stop(hash);
        }
        Ok(original)
    }

    async fn submit_replacement(
        &self,
        original: &Transaction,
        kind: TxKind,
        permille: u64,
    ) -> TxManagerResult<Transaction> {
        let gas_price = FeeEstimator::bump_gas_price(&original.gas_price, permille);

        let draft = match kind {
            TxKind::Cancel => TxDraft {
                from: original.from,
                to: original.from,
                value: U256::zero(),
                data: None,
                chain_id: original.chain_id,
                nonce: Some(original.nonce),
                gas_limit: Some(U256::from(TRANSFER_GAS_LIMIT)),
                gas_price: Some(gas_price),
                kind,
                replaces: Some(original.id.clone()),
            },
            _ => TxDraft {
                from: original.from,
                to: original.to,
                value: original.value,
                data: original.data.clone(),
                chain_id: original.chain_id,
                nonce: Some(original.nonce),
                gas_limit: Some(original.gas_limit),
                gas_price: Some(gas_price),
                kind,
                replaces: Some(original.id.clone()),
            },
        };

        let supersedes = Supersede {
            original_id: original.id.clone(),
            reason: retirement_reason(kind).to_string(),
        };

        self.submitter.submit_draft(draft, Some(supersedes)).await
    }
}

/// Failure reason recorded on the superseded transaction
fn retirement_reason(kind: TxKind) -> &'static str {
    match kind {
        TxKind::Cancel => "cancelled",
        _ => "replaced",
    }
}
