//! Domain events emitted by the transaction manager
//!
//! Adapters (HTTP API, metrics, UI bindings) subscribe to these instead of
//! reaching into the manager's state.

use crate::types::{Transaction, TxStatus};

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TxEvent {
    /// Transaction accepted by the ledger and now pending
    Submitted { transaction: Transaction },

    /// Transaction moved between lifecycle states
    StateChanged {
        id: String,
        hash: Option<H256>,
        from: TxStatus,
        to: TxStatus,
        transaction: Transaction,
    },

    /// Transaction superseded by a replacement with the same nonce
    Replaced {
        original_id: String,
        replacement_id: String,
        reason: String,
    },

    /// Watcher ran out of retries without a receipt
    WatcherExhausted { hash: H256, attempts: u32 },
}

impl TxEvent {
    /// Get event name for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            TxEvent::Submitted { .. } => "submitted",
            TxEvent::StateChanged { .. } => "state_changed",
            TxEvent::Replaced { .. } => "replaced",
            TxEvent::WatcherExhausted { .. } => "watcher_exhausted",
        }
    }

    pub fn state_changed(from: TxStatus, transaction: &Transaction) -> Self {
        TxEvent::StateChanged {
            id: transaction.id.clone(),
            hash: transaction.hash,
            from,
            to: transaction.status,
            transaction: transaction.clone(),
        }
    }
}

/// Fan-out channel for `TxEvent`s
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TxEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: TxEvent) {
        crate::metrics::record_event(&event);
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.sender.subscribe()
    }
}
