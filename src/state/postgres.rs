//! PostgreSQL key-value store

use super::store::KeyValueStore;
use crate::config::PersistenceConfig;
use crate::error::{TxManagerError, TxManagerResult};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Key-value store backed by a single PostgreSQL table
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store and connect the pool
    pub async fn new(config: &PersistenceConfig) -> TxManagerResult<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            TxManagerError::Config("persistence.database_url is not set".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> TxManagerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> TxManagerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> TxManagerResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TxManagerError::Persistence {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> TxManagerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(|e| TxManagerError::Persistence {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        debug!("Saved {} bytes under {}", value.len(), key);
        Ok(())
    }
}
