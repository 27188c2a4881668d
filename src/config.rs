//! Configuration management with validation and defaults
//!
//! Loaded once from TOML plus `WAGERBOOK_*` environment overrides, validated,
//! then handed to every component as an immutable value.

use crate::errors::{LedgerError, LedgerResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top level service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagerConfig {
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub odds: OddsConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// RocksDB location and lock behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    /// How long a transaction waits on a locked record before giving up
    pub lock_timeout_ms: i64,
    pub write_buffer_size_mb: usize,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/wagerbook".to_string(),
            lock_timeout_ms: 2_000,
            write_buffer_size_mb: 64,
            clear_on_start: false,
        }
    }
}

/// Ticket and account rules
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Coins granted when an account is opened
    pub starting_balance: Decimal,
    pub max_legs_per_ticket: usize,
    pub min_stake: Decimal,
    /// Upper bound on `stake × Π rate`, checked at placement so settlement
    /// arithmetic always stays in range
    pub max_potential_payout: Decimal,
    /// Run a recovery sweep over unsettled tickets at start-up
    pub recover_on_start: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(888.00),
            max_legs_per_ticket: 10,
            min_stake: dec!(0.01),
            max_potential_payout: dec!(1000000000000),
            recover_on_start: true,
        }
    }
}

/// Pari-mutuel quoting parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OddsConfig {
    /// Virtual legs credited to each side so an empty side still has a rate
    pub seed_weight: u32,
    pub min_rate: Decimal,
    pub max_rate: Decimal,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            seed_weight: 1,
            min_rate: dec!(1.00),
            max_rate: dec!(100.00),
        }
    }
}

/// HTTP request layer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Fallback filter when RUST_LOG is unset
    pub log_filter: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "wagerbook=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl WagerConfig {
    /// Throwaway configuration for tests and local experiments
    pub fn for_testing<P: AsRef<Path>>(data_directory: P) -> Self {
        Self {
            storage: StorageConfig {
                data_directory: data_directory.as_ref().to_string_lossy().to_string(),
                lock_timeout_ms: 10_000,
                write_buffer_size_mb: 8,
                clear_on_start: true,
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> LedgerResult<()> {
        if self.storage.data_directory.trim().is_empty() {
            return Err(LedgerError::Configuration(
                "storage.data_directory must not be empty".to_string(),
            ));
        }
        if self.storage.lock_timeout_ms <= 0 {
            return Err(LedgerError::Configuration(
                "storage.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.ledger.starting_balance < Decimal::ZERO {
            return Err(LedgerError::Configuration(
                "ledger.starting_balance must be >= 0".to_string(),
            ));
        }
        if self.ledger.max_legs_per_ticket == 0 {
            return Err(LedgerError::Configuration(
                "ledger.max_legs_per_ticket must be > 0".to_string(),
            ));
        }
        if self.ledger.min_stake <= Decimal::ZERO {
            return Err(LedgerError::Configuration(
                "ledger.min_stake must be > 0".to_string(),
            ));
        }
        if self.ledger.max_potential_payout <= Decimal::ZERO {
            return Err(LedgerError::Configuration(
                "ledger.max_potential_payout must be > 0".to_string(),
            ));
        }
        if self.odds.seed_weight == 0 {
            return Err(LedgerError::Configuration(
                "odds.seed_weight must be > 0".to_string(),
            ));
        }
        if self.odds.min_rate < Decimal::ONE || self.odds.max_rate < self.odds.min_rate {
            return Err(LedgerError::Configuration(format!(
                "odds rate bounds invalid: min {} max {}",
                self.odds.min_rate, self.odds.max_rate
            )));
        }
        Ok(())
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> LedgerResult<WagerConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => WagerConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> LedgerResult<WagerConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Configuration(format!("Failed to read {}: {}", path, e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> LedgerResult<WagerConfig> {
        toml::from_str(content)
            .map_err(|e| LedgerError::Configuration(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(config: &mut WagerConfig) -> LedgerResult<()> {
        if let Ok(dir) = env::var("WAGERBOOK_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Ok(host) = env::var("WAGERBOOK_API_HOST") {
            config.api.host = host;
        }
        if let Ok(port) = env::var("WAGERBOOK_API_PORT") {
            config.api.port = parse_env("WAGERBOOK_API_PORT", &port)?;
        }
        if let Ok(timeout) = env::var("WAGERBOOK_LOCK_TIMEOUT_MS") {
            config.storage.lock_timeout_ms = parse_env("WAGERBOOK_LOCK_TIMEOUT_MS", &timeout)?;
        }
        if let Ok(balance) = env::var("WAGERBOOK_STARTING_BALANCE") {
            config.ledger.starting_balance = parse_env("WAGERBOOK_STARTING_BALANCE", &balance)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> LedgerResult<T> {
    value.parse().map_err(|_| {
        LedgerError::Configuration(format!("Invalid value for {}: '{}'", field, value))
    })
}
