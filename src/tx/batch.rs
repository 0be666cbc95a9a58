//! Sequential batch submission with contiguous nonces

use super::nonce::NonceTracker;
use super::submitter::{parse_address, TransactionSubmitter};
use crate::config::BatchFailurePolicy;
use crate::error::{TxManagerError, TxManagerResult};
use crate::types::{BatchItem, BatchItemFailure, BatchStatus, TransactionBatch, TxOptions};

use chrono::Utc;
use ethers::types::U256;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Submits batch members one at a time so each consumes the next nonce
pub struct BatchCoordinator {
    submitter: Arc<TransactionSubmitter>,
    nonces: Arc<NonceTracker>,
    failure_policy: BatchFailurePolicy,
}

impl BatchCoordinator {
    pub fn new(
        submitter: Arc<TransactionSubmitter>,
        nonces: Arc<NonceTracker>,
        failure_policy: BatchFailurePolicy,
    ) -> Self {
        Self {
            submitter,
            nonces,
            failure_policy,
        }
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn submit_batch(
        &self,
        from: &str,
        items: Vec<BatchItem>,
    ) -> TxManagerResult<TransactionBatch> {
        if items.is_empty() {
            return Err(TxManagerError::Validation("Batch has no items".to_string()));
        }

        let sender = parse_address(from)?;
        let chain_id = self
            .submitter
            .resolve_chain_id(items.first().and_then(|item| item.options.chain_id))?;
        if items
            .iter()
            .any(|item| item.options.chain_id.is_some_and(|id| id != chain_id))
        {
            return Err(TxManagerError::Validation(
                "Batch items must share one chain".to_string(),
            ));
        }

        let mut batch = TransactionBatch {
            id: uuid::Uuid::new_v4().to_string(),
            from: sender,
            transactions: Vec::with_capacity(items.len()),
            total_value: U256::zero(),
            total_fee: U256::zero(),
            status: BatchStatus::Processing,
            failures: Vec::new(),
            created_at: Utc::now(),
        };

        let start_nonce = self.nonces.next_nonce(chain_id, sender, None).await;
        let mut next_nonce = start_nonce;
        info!(batch_id = %batch.id, start_nonce, "Submitting batch");

        for (index, item) in items.into_iter().enumerate() {
            let options = TxOptions {
                nonce: Some(next_nonce),
                chain_id: Some(chain_id),
                ..item.options
            };

            let result = self
                .submitter
                .submit(from, &item.to, &item.value, item.data.as_deref(), options)
                .await;

            match result {
                Ok(tx) => {
                    next_nonce += 1;
                    batch.total_value = batch.total_value.saturating_add(tx.value);
                    batch.total_fee = batch.total_fee.saturating_add(tx.fee);
                    batch.transactions.push(tx);
                }
                Err(e) => {
                    warn!(batch_id = %batch.id, index, error = %e, "Batch item failed");
                    batch.status = BatchStatus::Failed;
                    batch.failures.push(BatchItemFailure {
                        index,
                        error: e.to_string(),
                    });
                    if self.failure_policy == BatchFailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        if batch.status == BatchStatus::Processing {
            batch.status = BatchStatus::Completed;
        }
        if batch.transactions.is_empty() {
            self.nonces.release(chain_id, sender, start_nonce).await;
        }

        let status = match batch.status {
            BatchStatus::Completed => "completed",
            _ => "failed",
        };
        crate::metrics::record_batch(status);

        info!(
            batch_id = %batch.id,
            status,
            submitted = batch.transactions.len(),
            failed = batch.failures.len(),
            total_value = %batch.total_value,
            total_fee = %batch.total_fee,
            "Batch finished"
        );

        Ok(batch)
    }
}
