//! Configuration for the loyalty ledger.
//!
//! Supports YAML file and environment variable overrides.

mod backends;
mod ledger;

use serde::Deserialize;

pub use backends::{CacheBackend, CacheConfig, LockBackend, LockConfig, ShopifyConfig};
pub use ledger::{LedgerConfig, RedemptionConfig, MAX_PERIOD_DAYS, MAX_UTC_OFFSET_HOURS};

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "loyalty.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LOYALTY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LOYALTY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LOYALTY_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Expiry, history and calendar policy.
    pub ledger: LedgerConfig,
    /// Customer lock backend.
    pub lock: LockConfig,
    /// Balance cache backend.
    pub cache: CacheConfig,
    /// Redemption policy and voucher format.
    pub redemption: RedemptionConfig,
    /// Shopify Admin API credentials.
    pub shopify: ShopifyConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `loyalty.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.settings()?;
        self.redemption.settings()?;
        self.lock.validate(&self.shopify)?;
        if self.shopify.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "shopify.timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
