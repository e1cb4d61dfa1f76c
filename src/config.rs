//! Configuration management for ln-ledger
//!
//! Configuration is loaded from a TOML file; every field has a default.
//!
//! # Example Configuration File
//!
//! ```toml
//! [node]
//! data_dir = "/var/lib/ln-ledger"
//!
//! [ledger]
//! invoice_ttl_secs = 3600
//! checkout_ttl_secs = 900
//! tip_ttl_secs = 86400
//! payment_fee_ppm = 1000
//!
//! [sweeper]
//! interval_secs = 30
//!
//! [api]
//! bind_address = "0.0.0.0:8080"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node-local settings
    #[serde(default)]
    pub node: NodeConfig,

    /// Ledger policy
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Expiry sweeper
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-local configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for the ledger database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("ln-ledger"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Ledger policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Lifetime of a standalone invoice (seconds)
    #[serde(default = "default_invoice_ttl")]
    pub invoice_ttl_secs: u64,

    /// Lifetime of a point-of-sale checkout invoice (seconds)
    #[serde(default = "default_checkout_ttl")]
    pub checkout_ttl_secs: u64,

    /// Lifetime of a tip invoice (seconds)
    #[serde(default = "default_tip_ttl")]
    pub tip_ttl_secs: u64,

    /// Flat routing fee charged per payment (millisatoshis)
    #[serde(default)]
    pub payment_fee_base_msat: u64,

    /// Proportional routing fee (parts per million)
    #[serde(default = "default_payment_fee_ppm")]
    pub payment_fee_ppm: u64,

    /// Longest accepted invoice description
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            invoice_ttl_secs: default_invoice_ttl(),
            checkout_ttl_secs: default_checkout_ttl(),
            tip_ttl_secs: default_tip_ttl(),
            payment_fee_base_msat: 0,
            payment_fee_ppm: default_payment_fee_ppm(),
            max_description_len: default_max_description_len(),
        }
    }
}

impl LedgerConfig {
    /// Standalone invoice lifetime
    pub fn invoice_ttl(&self) -> Duration {
        Duration::from_secs(self.invoice_ttl_secs)
    }

    /// Checkout invoice lifetime
    pub fn checkout_ttl(&self) -> Duration {
        Duration::from_secs(self.checkout_ttl_secs)
    }

    /// Tip invoice lifetime
    pub fn tip_ttl(&self) -> Duration {
        Duration::from_secs(self.tip_ttl_secs)
    }
}

fn default_invoice_ttl() -> u64 {
    3_600 // 1 hour
}

fn default_checkout_ttl() -> u64 {
    900 // 15 minutes at the till
}

fn default_tip_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_payment_fee_ppm() -> u64 {
    1_000 // 0.1%
}

fn default_max_description_len() -> usize {
    640
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweeper at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between sweeps (seconds)
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Maximum invoices expired per sweep
    #[serde(default = "default_sweep_batch")]
    pub batch_size: u32,

    /// First retry delay when the store is unavailable (seconds)
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_secs: u64,

    /// Retry delay ceiling (seconds)
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
            batch_size: default_sweep_batch(),
            backoff_initial_secs: default_backoff_initial(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl SweeperConfig {
    /// Time between sweeps
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Retry delay for the given consecutive failure count (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        let secs = self
            .backoff_initial_secs
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_secs);
        Duration::from_secs(secs)
    }
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_sweep_batch() -> u32 {
    500
}

fn default_backoff_initial() -> u64 {
    1
}

fn default_backoff_max() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server to
    #[serde(default = "default_api_bind")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_bind(),
            enable_cors: true,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (`sqlite:<path>` or `sqlite::memory:`)
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:ln-ledger.db".to_string()
}

impl Config {
    /// Resolve the database URL, making it relative to data_dir if needed
    pub fn resolve_database_url(&self) -> String {
        let url = &self.database.url;

        if url.starts_with("sqlite:/") || url == "sqlite::memory:" {
            return url.clone();
        }

        let path = url.strip_prefix("sqlite:").unwrap_or(url);

        if std::path::Path::new(path).is_absolute() {
            return url.clone();
        }

        let db_path = self.node.data_dir.join(path);
        format!("sqlite:{}", db_path.display())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Get the API bind address
    pub fn api_bind_address(&self) -> String {
        self.api.bind_address.clone()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let ttls = [
            ("invoice_ttl_secs", self.ledger.invoice_ttl_secs),
            ("checkout_ttl_secs", self.ledger.checkout_ttl_secs),
            ("tip_ttl_secs", self.ledger.tip_ttl_secs),
        ];
        for (name, value) in ttls {
            if value == 0 {
                return Err(format!("ledger.{} must be greater than 0", name));
            }
        }

        if self.ledger.payment_fee_ppm > 1_000_000 {
            return Err("Fee rate cannot exceed 100% (1,000,000 ppm)".to_string());
        }

        if self.ledger.max_description_len == 0 {
            return Err("ledger.max_description_len must be greater than 0".to_string());
        }

        if self.sweeper.interval_secs == 0 {
            return Err("sweeper.interval_secs must be greater than 0".to_string());
        }

        if self.sweeper.batch_size == 0 {
            return Err("sweeper.batch_size must be greater than 0".to_string());
        }

        if self.sweeper.backoff_initial_secs == 0
            || self.sweeper.backoff_initial_secs > self.sweeper.backoff_max_secs
        {
            return Err(
                "sweeper backoff must satisfy 0 < backoff_initial_secs <= backoff_max_secs"
                    .to_string(),
            );
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.ledger.payment_fee_ppm = 2_000_000;
        assert!(config.validate().is_err());

        config.ledger.payment_fee_ppm = 1_000;
        config.ledger.tip_ttl_secs = 0;
        assert!(config.validate().is_err());

        config.ledger.tip_ttl_secs = 60;
        config.sweeper.backoff_initial_secs = 120;
        assert!(config.validate().is_err());

        config.sweeper.backoff_initial_secs = 1;
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [ledger]
            checkout_ttl_secs = 600

            [sweeper]
            interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.checkout_ttl_secs, 600);
        assert_eq!(config.ledger.invoice_ttl_secs, 3_600);
        assert_eq!(config.sweeper.interval(), Duration::from_secs(5));
        assert_eq!(config.ledger.payment_fee_ppm, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sweeper_backoff_is_capped() {
        let sweeper = SweeperConfig::default();
        assert_eq!(sweeper.backoff(1), Duration::from_secs(1));
        assert_eq!(sweeper.backoff(2), Duration::from_secs(2));
        assert_eq!(sweeper.backoff(4), Duration::from_secs(8));
        assert_eq!(sweeper.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_database_url() {
        let mut config = Config::default();
        config.node.data_dir = PathBuf::from("/var/lib/ln-ledger");
        assert_eq!(
            config.resolve_database_url(),
            "sqlite:/var/lib/ln-ledger/ln-ledger.db"
        );

        config.database.url = "sqlite::memory:".to_string();
        assert_eq!(config.resolve_database_url(), "sqlite::memory:");
    }
}
