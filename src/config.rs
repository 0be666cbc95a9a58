//! Configuration management for the wallet transaction manager
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: regex::Regex = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub manager: ManagerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub fee_distribution: FeeDistributionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Lifecycle policy knobs for the core
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_cancel_multiplier")]
    pub cancel_multiplier: f64,
    #[serde(default = "default_speed_up_multiplier")]
    pub speed_up_multiplier: f64,
    #[serde(default = "default_fee_cache_ttl_secs")]
    pub fee_cache_ttl_secs: u64,
    #[serde(default)]
    pub gas_limit_buffer_percent: u64,
    #[serde(default)]
    pub gas_price_buffer_percent: u64,
    #[serde(default = "default_true")]
    pub fallback_gas_limit: bool,
    #[serde(default)]
    pub exhausted_policy: ExhaustedPolicy,
    #[serde(default)]
    pub batch_failure_policy: BatchFailurePolicy,
    pub default_chain_id: Option<u64>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// What happens to a transaction whose watcher ran out of retries
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    #[default]
    MarkFailed,
    LeavePending,
}

/// What the batch coordinator does after a member fails to submit
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    #[default]
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,
    pub path: Option<String>,
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeeDistributionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fee_policy")]
    pub policy: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    60
}

fn default_history_limit() -> usize {
    1_000
}

fn default_cancel_multiplier() -> f64 {
    1.10
}

fn default_speed_up_multiplier() -> f64 {
    1.25
}

fn default_fee_cache_ttl_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_event_capacity() -> usize {
    1_024
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_max_connections() -> u32 {
    5
}

fn default_fee_policy() -> String {
    "standard".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            history_limit: default_history_limit(),
            cancel_multiplier: default_cancel_multiplier(),
            speed_up_multiplier: default_speed_up_multiplier(),
            fee_cache_ttl_secs: default_fee_cache_ttl_secs(),
            gas_limit_buffer_percent: 0,
            gas_price_buffer_percent: 0,
            fallback_gas_limit: true,
            exhausted_policy: ExhaustedPolicy::default(),
            batch_failure_policy: BatchFailurePolicy::default(),
            default_chain_id: None,
            user_id: default_user_id(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fee_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.fee_cache_ttl_secs)
    }

    /// Effective confirmation timeout of a single watcher
    pub fn watch_window(&self) -> Duration {
        self.poll_interval() * self.max_retries
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("manager.poll_interval_ms must be positive");
        }
        if self.max_retries == 0 {
            anyhow::bail!("manager.max_retries must be positive");
        }
        if self.history_limit == 0 {
            anyhow::bail!("manager.history_limit must be positive");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("manager.event_capacity must be positive");
        }
        if self.cancel_multiplier <= 1.0 || self.speed_up_multiplier <= 1.0 {
            anyhow::bail!("Replacement fee multipliers must be greater than 1.0");
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            path: None,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("WALLET_TX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from a TOML document, substituting `${VAR}` references
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        if settings.manager.default_chain_id.is_none() {
            settings.manager.default_chain_id = Some(settings.ledger.chain_id);
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.manager.validate()?;

        if self.ledger.chain_id == 0 {
            anyhow::bail!("ledger.chain_id must be non-zero");
        }
        if self.ledger.rpc_urls.is_empty() {
            anyhow::bail!("Ledger has no RPC URLs configured");
        }

        match self.persistence.backend {
            PersistenceBackend::File if self.persistence.path.is_none() => {
                anyhow::bail!("persistence.path is required for the file backend");
            }
            PersistenceBackend::Postgres if self.persistence.database_url.is_none() => {
                anyhow::bail!("persistence.database_url is required for the postgres backend");
            }
            _ => {}
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
