//! Fee-distribution notifications
//!
//! Sent after a successful submission. Delivery is best-effort: failures are
//! logged and never affect the transaction.

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone)]
#[error("Fee notification failed: {0}")]
pub struct NotifyError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeNotifier: Send + Sync {
    async fn notify(&self, amount: U256, policy: &str, tx_ref: &str) -> Result<(), NotifyError>;
}

/// Notifier that only records the distribution in the log
pub struct LogNotifier;

#[async_trait]
impl FeeNotifier for LogNotifier {
    async fn notify(&self, amount: U256, policy: &str, tx_ref: &str) -> Result<(), NotifyError> {
        info!(%amount, policy, tx_ref, "Fee distribution");
        Ok(())
    }
}

/// Fire-and-forget dispatch on a background task
pub fn dispatch(notifier: Arc<dyn FeeNotifier>, amount: U256, policy: String, tx_ref: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(amount, &policy, &tx_ref).await {
            warn!(tx_ref = %tx_ref, error = %e, "Fee distribution notification failed");
        }
    });
}
