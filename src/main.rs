//! Wallet transaction manager service
//!
//! Submits wallet transactions to a ledger node, watches them to
//! confirmation and exposes the lifecycle over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use wallet_tx_manager::api;
use wallet_tx_manager::config::{LogFormat, PersistenceBackend, Settings};
use wallet_tx_manager::events::TxEvent;
use wallet_tx_manager::ledger::{EthersLedger, WalletSigner};
use wallet_tx_manager::metrics::MetricsServer;
use wallet_tx_manager::notify::LogNotifier;
use wallet_tx_manager::state::{FileStore, KeyValueStore, MemoryStore, PgStore};
use wallet_tx_manager::tx::FeeDistribution;
use wallet_tx_manager::TxManager;

const DEFAULT_KEY_ENV: &str = "WALLET_PRIVATE_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.logging.format);

    info!("Starting wallet transaction manager v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for chain {} ({} RPC endpoints)",
        settings.ledger.chain_id,
        settings.ledger.rpc_urls.len()
    );

    // Initialize history persistence
    let store = open_store(&settings).await?;

    // Ledger client and signer
    let ledger = Arc::new(EthersLedger::new(settings.ledger.clone())?);
    match ledger.get_block_number().await {
        Ok(block) => info!("Connected to chain {} at block {}", ledger.chain_id(), block),
        Err(e) => warn!("Ledger not reachable yet: {}", e),
    }

    let key_env = settings
        .wallet
        .private_key_env
        .as_deref()
        .unwrap_or(DEFAULT_KEY_ENV);
    let signer = Arc::new(WalletSigner::from_env(key_env)?);
    info!("Signing as {:?}", signer.address());

    let fee_distribution = settings.fee_distribution.enabled.then(|| FeeDistribution {
        notifier: Arc::new(LogNotifier),
        policy: settings.fee_distribution.policy.clone(),
    });

    let manager = Arc::new(TxManager::new(
        settings.manager.clone(),
        ledger,
        signer,
        store,
        fee_distribution,
    )?);

    match manager.restore_history().await {
        Ok(restored) => info!("Restored {} history entries", restored),
        Err(e) => warn!("Failed to restore history, starting empty: {}", e),
    }

    // Relay lifecycle events to the log
    let events_handle = tokio::spawn({
        let mut events = manager.subscribe();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event relay lagged, skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    // Start API server
    let api_handle = if settings.api.enabled {
        let config = settings.api.clone();
        let manager = manager.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, manager).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Wallet transaction manager is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    manager.shutdown().await;

    // Abort background tasks
    events_handle.abort();
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Wallet transaction manager stopped");
    Ok(())
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn KeyValueStore>> {
    let persistence = &settings.persistence;

    let store: Arc<dyn KeyValueStore> = match persistence.backend {
        PersistenceBackend::Memory => {
            warn!("Using in-memory history store, history is lost on restart");
            Arc::new(MemoryStore::new())
        }
        PersistenceBackend::File => {
            let path = persistence
                .path
                .clone()
                .context("persistence.path is required for the file backend")?;
            info!("Persisting history under {}", path);
            Arc::new(FileStore::new(path).await?)
        }
        PersistenceBackend::Postgres => {
            let store = PgStore::new(persistence).await?;
            store.health_check().await?;
            info!("Database connection established");
            store.run_migrations().await?;
            Arc::new(store)
        }
    };

    Ok(store)
}

fn log_event(event: &TxEvent) {
    match event {
        TxEvent::Submitted { transaction } => debug!(
            tx_id = %transaction.id,
            hash = ?transaction.hash,
            nonce = transaction.nonce,
            "event: submitted"
        ),
        TxEvent::StateChanged { id, hash, from, to, .. } => {
            info!(tx_id = %id, ?hash, %from, %to, "event: state changed")
        }
        TxEvent::Replaced {
            original_id,
            replacement_id,
            reason,
        } => info!(%original_id, %replacement_id, %reason, "event: replaced"),
        TxEvent::WatcherExhausted { hash, attempts } => {
            warn!(?hash, attempts, "event: watcher exhausted")
        }
    }
}

fn init_logging(format: &LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,wallet_tx_manager=debug,sqlx=warn,hyper=warn")
    });

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
