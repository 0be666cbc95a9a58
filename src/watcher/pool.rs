//! Per-hash receipt polling with cancellation and late-response discard

use super::{ResolutionListener, WatchOutcome};
use crate::config::{ExhaustedPolicy, ManagerConfig};
use crate::error::TxManagerResult;
use crate::events::{EventBus, TxEvent};
use crate::ledger::LedgerClient;
use crate::state::TxBook;
use crate::types::{Receipt, Transaction};

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WatcherEntry {
    /// Distinguishes a re-registration from the task it replaced
    generation: u64,
    token: CancellationToken,
    listeners: Vec<ResolutionListener>,
}

enum Resolution {
    Receipt(Receipt),
    Exhausted { attempts: u32 },
}

enum Transition {
    Confirm { block_number: u64, confirmations: u64 },
    Fail(&'static str),
}

impl Transition {
    fn apply(self, tx: &mut Transaction) -> TxManagerResult<()> {
        match self {
            Transition::Confirm {
                block_number,
                confirmations,
            } => tx.confirm(block_number, confirmations),
            Transition::Fail(reason) => tx.fail(reason),
        }
    }
}

/// Registry of active watchers, at most one per hash
pub struct WatcherPool {
    ledger: Arc<dyn LedgerClient>,
    book: Arc<TxBook>,
    events: EventBus,
    poll_interval: Duration,
    max_retries: u32,
    exhausted_policy: ExhaustedPolicy,
    watchers: DashMap<H256, WatcherEntry>,
    next_generation: AtomicU64,
    /// Parent of every watcher token
    shutdown: CancellationToken,
}

impl WatcherPool {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        book: Arc<TxBook>,
        events: EventBus,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            ledger,
            book,
            events,
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
            exhausted_policy: config.exhausted_policy,
            watchers: DashMap::new(),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start watching `hash`.
    ///
    /// Returns `false` when a watcher already exists; the listener, if any, is
    /// attached to it and no second task is started.
    pub fn register(self: &Arc<Self>, hash: H256, listener: Option<ResolutionListener>) -> bool {
        if self.shutdown.is_cancelled() {
            warn!(?hash, "Watcher pool is shut down, not watching");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        match self.watchers.entry(hash) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                if let Some(listener) = listener {
                    existing.get_mut().listeners.push(listener);
                }
                debug!(?hash, "Watcher already registered");
                return false;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(WatcherEntry {
                    generation,
                    token: token.clone(),
                    listeners: listener.into_iter().collect(),
                });
            }
        }

        debug!(?hash, generation, "Watcher registered");
        crate::metrics::record_watchers_active(self.watchers.len());

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            pool.run(hash, generation, token).await;
        });
        true
    }

    /// Stop watching `hash`. Unknown hashes are a no-op.
    pub fn stop(&self, hash: H256) -> bool {
        match self.watchers.remove(&hash) {
            Some((_, entry)) => {
                entry.token.cancel();
                debug!(?hash, "Watcher stopped");
                crate::metrics::record_watchers_active(self.watchers.len());
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, hash: H256) -> bool {
        self.watchers.contains_key(&hash)
    }

    pub fn active_count(&self) -> usize {
        self.watchers.len()
    }

    /// Cancel every watcher and refuse new registrations
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let stopped = self.watchers.len();
        self.watchers.clear();
        crate::metrics::record_watchers_active(0);
        info!(stopped, "Watcher pool shut down");
    }

    async fn run(&self, hash: H256, generation: u64, token: CancellationToken) {
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(?hash, "Watcher cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let polled = self.ledger.get_receipt(hash).await;
            if token.is_cancelled() {
                debug!(?hash, "Discarding poll result for stopped watcher");
                return;
            }

            match polled {
                Ok(Some(receipt)) => {
                    self.resolve(hash, generation, Resolution::Receipt(receipt)).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(?hash, attempt = attempts + 1, error = %e, "Receipt poll failed");
                }
            }

            attempts += 1;
            if attempts >= self.max_retries {
                self.resolve(hash, generation, Resolution::Exhausted { attempts }).await;
                return;
            }
        }
    }

    async fn resolve(&self, hash: H256, generation: u64, resolution: Resolution) {
        let mut book = self.book.lock().await;

        // Stopped or replaced while the poll was in flight
        let Some((_, entry)) = self
            .watchers
            .remove_if(&hash, |_, entry| entry.generation == generation)
        else {
            debug!(?hash, generation, "Discarding late poll result");
            return;
        };
        crate::metrics::record_watchers_active(self.watchers.len());

        let (transition, exhausted) = match &resolution {
            Resolution::Receipt(receipt) if receipt.success => (
                Some(Transition::Confirm {
                    block_number: receipt.block_number,
                    confirmations: receipt.confirmations,
                }),
                None,
            ),
            Resolution::Receipt(_) => (Some(Transition::Fail("execution reverted")), None),
            Resolution::Exhausted { attempts } => match self.exhausted_policy {
                ExhaustedPolicy::MarkFailed => {
                    (Some(Transition::Fail("confirmation timeout")), Some(*attempts))
                }
                ExhaustedPolicy::LeavePending => (None, Some(*attempts)),
            },
        };

        let pending_id = book.pending_id_for_hash(hash);
        let transitioned = match (transition, pending_id.as_deref()) {
            (Some(transition), Some(id)) => {
                match book.finalize(id, |tx| transition.apply(tx)) {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(?hash, tx_id = %id, error = %e, "Failed to apply watcher result");
                        None
                    }
                }
            }
            _ => None,
        };

        let current = match transitioned {
            Some((_, ref tx)) => Some(tx.clone()),
            None => pending_id.as_deref().and_then(|id| book.pending(id).cloned()),
        };
        drop(book);

        if let Some(attempts) = exhausted {
            warn!(?hash, attempts, policy = ?self.exhausted_policy, "Watcher exhausted without receipt");
            self.events.publish(TxEvent::WatcherExhausted { hash, attempts });
        }

        if let Some((from, tx)) = transitioned {
            info!(tx_id = %tx.id, ?hash, status = %tx.status, block = ?tx.block_number, "Transaction resolved");
            self.book.persist().await;
            self.events.publish(TxEvent::state_changed(from, &tx));
        }

        let outcome = match resolution {
            Resolution::Receipt(receipt) if receipt.success => WatchOutcome::Confirmed {
                receipt,
                transaction: current,
            },
            Resolution::Receipt(receipt) => WatchOutcome::Reverted {
                receipt,
                transaction: current,
            },
            Resolution::Exhausted { attempts } => WatchOutcome::Exhausted {
                hash,
                attempts,
                transaction: current,
            },
        };

        for listener in entry.listeners {
            listener(outcome.clone());
        }
    }
}
