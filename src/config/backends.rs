//! Lock, cache and Shopify backend configuration.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::shopify::{AdminClientConfig, DEFAULT_API_VERSION, DEFAULT_NAMESPACE, MAX_RETRY_DELAY};

/// Lock backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process lock table. Only correct with a single instance.
    #[default]
    Local,
    Redis,
}

/// Customer lock configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub backend: LockBackend,
    /// Maximum wait for the lock.
    pub timeout_ms: u64,
    /// Retry interval while the lock is held elsewhere.
    pub poll_interval_ms: u64,
    /// Auto-expiry of a distributed lock whose holder died. Derived from the
    /// Shopify request budget when unset.
    pub lease_ms: Option<u64>,
    /// Key prefix for distributed locks.
    pub key_prefix: String,
    /// Redis connection URL.
    pub redis_url: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Local,
            timeout_ms: 5000,
            poll_interval_ms: 50,
            lease_ms: None,
            key_prefix: "lock:customer".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lease for a distributed lock, never shorter than the longest critical
    /// section `shopify` allows unless set explicitly.
    pub fn lease(&self, shopify: &ShopifyConfig) -> Duration {
        self.lease_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| shopify.section_budget())
    }

    /// A lease that can lapse mid-section lets a second holder in while the
    /// first still writes, so Redis leases must cover the section budget.
    pub fn validate(&self, shopify: &ShopifyConfig) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("lock.timeout_ms", "must be greater than zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "lock.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.backend == LockBackend::Redis {
            let budget = shopify.section_budget();
            let lease = self.lease(shopify);
            if lease < budget {
                return Err(ConfigError::invalid(
                    "lock.lease_ms",
                    format!(
                        "{} ms is shorter than the worst-case critical section ({} ms)",
                        lease.as_millis(),
                        budget.as_millis()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Balance cache backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
    Disabled,
}

/// Balance cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Key prefix for Redis entries.
    pub key_prefix: String,
    /// Redis connection URL.
    pub redis_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_secs: 300,
            key_prefix: "points".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Shopify Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShopifyConfig {
    /// Shop domain, e.g. `example.myshopify.com`.
    pub domain: String,
    /// Admin API access token.
    pub access_token: String,
    pub api_version: String,
    /// Metafield namespace.
    pub namespace: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries on transient failures.
    pub max_retries: usize,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            access_token: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Admin API calls in the longest critical section: snapshot read, discount
/// create, discount lookup, metafield write and compensating delete.
pub const ADMIN_CALLS_PER_SECTION: u32 = 5;

impl ShopifyConfig {
    /// Worst case for one Admin API call: every attempt times out and every
    /// retry waits the maximum backoff.
    pub fn request_budget(&self) -> Duration {
        let attempts = u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        let retries = attempts - 1;
        Duration::from_secs(self.timeout_secs)
            .saturating_mul(attempts)
            .saturating_add(MAX_RETRY_DELAY.saturating_mul(retries))
    }

    /// Worst case for one ledger critical section against Shopify.
    pub fn section_budget(&self) -> Duration {
        self.request_budget().saturating_mul(ADMIN_CALLS_PER_SECTION)
    }

    /// True when both domain and token are set.
    pub fn is_configured(&self) -> bool {
        !self.domain.is_empty() && !self.access_token.is_empty()
    }

    pub fn client_config(&self) -> AdminClientConfig {
        AdminClientConfig {
            shop_domain: self.domain.clone(),
            access_token: self.access_token.clone(),
            api_version: self.api_version.clone(),
            namespace: self.namespace.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
        }
    }
}
