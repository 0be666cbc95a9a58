//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction lifecycle transitions
//! - Replacements and batch outcomes
//! - Watcher pool occupancy and exhaustion
//! - History size

use crate::error::{TxManagerError, TxManagerResult};
use crate::events::TxEvent;
use crate::types::TxStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref EVENTS_EMITTED: CounterVec = register_counter_vec!(
        "wallet_tx_events_total",
        "Total domain events emitted by type",
        &["event_type"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "wallet_tx_submitted_total",
        "Total transactions accepted by the ledger",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "wallet_tx_rejected_total",
        "Total transactions rejected at submission",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "wallet_tx_confirmed_total",
        "Total transactions confirmed",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "wallet_tx_failed_total",
        "Total transactions failed after submission",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_REPLACED: CounterVec = register_counter_vec!(
        "wallet_tx_replaced_total",
        "Total transactions superseded by a replacement",
        &["reason"]
    ).unwrap();

    pub static ref BATCHES: CounterVec = register_counter_vec!(
        "wallet_tx_batches_total",
        "Total batches by final status",
        &["status"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "wallet_tx_confirmation_latency_seconds",
        "Time from submission to confirmation",
        &["chain_id"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    pub static ref WATCHERS_ACTIVE: Gauge = register_gauge!(
        "wallet_tx_watchers_active",
        "Receipt watchers currently polling"
    ).unwrap();

    pub static ref WATCHERS_EXHAUSTED: Counter = register_counter!(
        "wallet_tx_watchers_exhausted_total",
        "Watchers that ran out of retries"
    ).unwrap();

    pub static ref HISTORY_SIZE: Gauge = register_gauge!(
        "wallet_tx_history_size",
        "Entries currently held in the history store"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> TxManagerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TxManagerError::Internal(format!("Metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TxManagerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_event(event: &TxEvent) {
    EVENTS_EMITTED.with_label_values(&[event.name()]).inc();

    match event {
        TxEvent::Submitted { transaction } => {
            TX_SUBMITTED
                .with_label_values(&[&transaction.chain_id.to_string(), transaction.kind.as_str()])
                .inc();
        }
        TxEvent::StateChanged { to, transaction, .. } => {
            let chain_id = transaction.chain_id.to_string();
            match to {
                TxStatus::Confirmed => {
                    TX_CONFIRMED.with_label_values(&[&chain_id]).inc();
                    let latency = chrono::Utc::now() - transaction.created_at;
                    CONFIRMATION_LATENCY
                        .with_label_values(&[&chain_id])
                        .observe(latency.num_milliseconds().max(0) as f64 / 1000.0);
                }
                TxStatus::Failed if transaction.hash.is_some() => {
                    TX_FAILED.with_label_values(&[&chain_id]).inc();
                }
                TxStatus::Failed => {
                    TX_REJECTED.with_label_values(&[&chain_id]).inc();
                }
                TxStatus::Pending => {}
            }
        }
        TxEvent::Replaced { reason, .. } => {
            TX_REPLACED.with_label_values(&[reason]).inc();
        }
        TxEvent::WatcherExhausted { .. } => {
            WATCHERS_EXHAUSTED.inc();
        }
    }
}

pub fn record_watchers_active(count: usize) {
    WATCHERS_ACTIVE.set(count as f64);
}

pub fn record_history_size(size: usize) {
    HISTORY_SIZE.set(size as f64);
}

pub fn record_batch(status: &str) {
    BATCHES.with_label_values(&[status]).inc();
}
