//! Nonce reservation for transaction submission
//!
//! Handles:
//! - Ledger pending-count lookup per sender
//! - Local reservation so overlapping submissions never share a nonce
//! - Release of reserved nonces whose submission never reached the ledger
//! - Caller overrides (replacements and batches)

use crate::ledger::LedgerClient;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Next nonce to hand out locally for one sender; 0 until something is reserved
type SenderSlot = Arc<Mutex<u64>>;

/// Reserves the next usable nonce per (chain, sender)
pub struct NonceTracker {
    ledger: Arc<dyn LedgerClient>,
    senders: DashMap<(u64, Address), SenderSlot>,
}

impl NonceTracker {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            senders: DashMap::new(),
        }
    }

    fn slot(&self, chain_id: u64, sender: Address) -> SenderSlot {
        self.senders
            .entry((chain_id, sender))
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }

    /// Reserve the next nonce for `sender`. An override always wins and
    /// reserves nothing.
    ///
    /// The sender's slot stays locked across the ledger query, so concurrent
    /// callers are handed consecutive nonces. A failed ledger query degrades
    /// to 0 without reserving; the ledger rejects it if the nonce is wrong.
    pub async fn next_nonce(&self, chain_id: u64, sender: Address, override_nonce: Option<u64>) -> u64 {
        if let Some(nonce) = override_nonce {
            debug!(chain_id, ?sender, nonce, "Using caller-supplied nonce");
            return nonce;
        }

        let slot = self.slot(chain_id, sender);
        let mut next = slot.lock().await;

        let on_chain = match self.ledger.get_nonce(sender).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!(chain_id, ?sender, error = %e, "Failed to fetch nonce, defaulting to 0");
                return 0;
            }
        };

        if *next > on_chain {
            debug!(
                chain_id,
                ?sender,
                on_chain,
                local = *next,
                "Ledger pending count lags local submissions"
            );
        }

        let nonce = on_chain.max(*next);
        *next = nonce + 1;

        debug!(chain_id, ?sender, nonce, "Reserved nonce");
        nonce
    }

    /// Record that the ledger accepted `nonce` from `sender`
    pub async fn observe(&self, chain_id: u64, sender: Address, nonce: u64) {
        let slot = self.slot(chain_id, sender);
        let mut next = slot.lock().await;
        if nonce + 1 > *next {
            *next = nonce + 1;
        }
    }

    /// Hand back a reserved nonce whose submission never reached the ledger.
    ///
    /// Only the most recent reservation can be rolled back; an older one
    /// leaves a gap that the ledger pending count fills once `reset` runs.
    pub async fn release(&self, chain_id: u64, sender: Address, nonce: u64) {
        let Some(slot) = self.senders.get(&(chain_id, sender)).map(|s| s.clone()) else {
            return;
        };

        let mut next = slot.lock().await;
        if *next == nonce + 1 {
            *next = nonce;
            debug!(chain_id, ?sender, nonce, "Released nonce");
        } else {
            warn!(
                chain_id,
                ?sender,
                nonce,
                next = *next,
                "Released nonce is not the latest reservation"
            );
        }
    }

    /// Forget local state for `sender`, trusting the ledger again
    pub fn reset(&self, chain_id: u64, sender: Address) {
        self.senders.remove(&(chain_id, sender));
    }
}
