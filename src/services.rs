//! Service wiring from configuration.

use std::sync::Arc;

use tracing::{error, info};

use crate::cache::{BalanceCache, MemoryBalanceCache, NoopBalanceCache};
use crate::config::{CacheBackend, Config, LockBackend};
use crate::discount::DiscountService;
use crate::error::LedgerError;
use crate::ledger::PointsLedger;
use crate::lock::{CustomerLock, CustomerLocks, LocalLock};
use crate::model::{CustomerId, CustomerRef};
use crate::redemption::RedemptionEngine;
use crate::shopify::{AdminClient, ShopifyDiscountService, ShopifyMetafieldStore};
use crate::store::{CustomerDirectory, MetafieldStore, StoreError};

/// Ledger and redemption engine sharing one store, lock table and cache.
#[derive(Clone)]
pub struct Services {
    pub ledger: PointsLedger,
    pub redemption: RedemptionEngine,
    /// Email lookup, when the backing store supports it.
    pub directory: Option<Arc<dyn CustomerDirectory>>,
}

impl Services {
    pub fn with_directory(mut self, directory: Arc<dyn CustomerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Turn a caller-supplied reference into a customer id.
    pub async fn resolve(&self, customer: &CustomerRef) -> crate::Result<CustomerId> {
        match customer {
            CustomerRef::Id(id) => Ok(id.clone()),
            CustomerRef::Email(email) => {
                let directory = self.directory.as_ref().ok_or_else(|| {
                    LedgerError::InvalidCustomerId(format!("{} (no customer directory)", email))
                })?;
                directory
                    .find_by_email(email)
                    .await?
                    .ok_or_else(|| StoreError::CustomerNotFound(email.clone()).into())
            }
        }
    }
}

/// Build services backed by the Shopify Admin API.
pub async fn build_services(config: &Config) -> Result<Services, Box<dyn std::error::Error>> {
    if !config.shopify.is_configured() {
        error!("Shopify domain and access token are required");
        return Err("Shopify credentials not configured".into());
    }

    let client = Arc::new(AdminClient::new(config.shopify.client_config())?);
    info!(
        shop = %config.shopify.domain,
        api_version = %config.shopify.api_version,
        "Shopify Admin API client ready"
    );

    let store = Arc::new(ShopifyMetafieldStore::new(client.clone()));
    let discounts = Arc::new(ShopifyDiscountService::new(client));
    let services = build_services_with(config, store.clone(), discounts).await?;
    Ok(services.with_directory(store))
}

/// Build services over the given store and discount backends.
pub async fn build_services_with(
    config: &Config,
    store: Arc<dyn MetafieldStore>,
    discounts: Arc<dyn DiscountService>,
) -> Result<Services, Box<dyn std::error::Error>> {
    config.validate()?;
    let locks = CustomerLocks::new(init_lock(config).await?, config.lock.timeout());
    let cache = init_cache(config).await?;
    let catalog = config.ledger.catalog()?;

    let ledger = PointsLedger::new(store)
        .with_locks(locks)
        .with_cache(cache)
        .with_catalog(catalog)
        .with_settings(config.ledger.settings()?);
    let redemption = RedemptionEngine::new(ledger.clone(), discounts)
        .with_settings(config.redemption.settings()?);

    Ok(Services {
        ledger,
        redemption,
        directory: None,
    })
}

async fn init_lock(config: &Config) -> Result<Arc<dyn CustomerLock>, Box<dyn std::error::Error>> {
    info!("Lock backend: {:?}", config.lock.backend);

    match config.lock.backend {
        LockBackend::Local => Ok(Arc::new(LocalLock::new())),
        #[cfg(feature = "redis")]
        LockBackend::Redis => {
            let lock = crate::lock::RedisLock::new(
                &config.lock.redis_url,
                Some(&config.lock.key_prefix),
                config.lock.lease(&config.shopify),
            )
            .await?
            .with_poll_interval(config.lock.poll_interval());
            Ok(Arc::new(lock))
        }
        #[cfg(not(feature = "redis"))]
        LockBackend::Redis => {
            error!("Redis lock requested but 'redis' feature is not enabled");
            Err("Redis feature not enabled".into())
        }
    }
}

async fn init_cache(config: &Config) -> Result<Arc<dyn BalanceCache>, Box<dyn std::error::Error>> {
    info!("Balance cache: {:?}", config.cache.backend);

    match config.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryBalanceCache::new(config.cache.ttl()))),
        CacheBackend::Disabled => Ok(Arc::new(NoopBalanceCache)),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            let cache = crate::cache::RedisBalanceCache::new(
                &config.cache.redis_url,
                Some(&config.cache.key_prefix),
                config.cache.ttl(),
            )
            .await?;
            Ok(Arc::new(cache))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => {
            error!("Redis cache requested but 'redis' feature is not enabled");
            Err("Redis feature not enabled".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::InMemoryDiscountService;
    use crate::redemption::RedemptionPolicy;
    use crate::store::InMemoryMetafieldStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_build_services_requires_shopify_credentials() {
        assert!(build_services(&Config::for_test()).await.is_err());
    }

    #[tokio::test]
    async fn test_services_share_backends() {
        let mut config = Config::for_test();
        config.cache.backend = CacheBackend::Disabled;
        config.redemption.policy = RedemptionPolicy::AllowList { amounts: vec![10] };

        let store = Arc::new(InMemoryMetafieldStore::new());
        let services = build_services_with(&config, store, Arc::new(InMemoryDiscountService::new()))
            .await
            .unwrap();
        let customer = CustomerId::parse("1").unwrap();

        services
            .ledger
            .complete_task(&customer, "login", json!({}))
            .await
            .unwrap();
        let outcome = services.redemption.redeem(&customer, 10).await.unwrap();

        assert!(outcome.success());
        assert_eq!(services.ledger.get_balance(&customer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolve_customer_by_email() {
        let store = Arc::new(InMemoryMetafieldStore::strict());
        let reader = CustomerId::parse("8105337946248").unwrap();
        store.add_customer_with_email(&reader, "reader@example.com").await;

        let services = build_services_with(
            &Config::for_test(),
            store.clone(),
            Arc::new(InMemoryDiscountService::new()),
        )
        .await
        .unwrap();
        let by_email = CustomerRef::Email("reader@example.com".to_string());

        assert!(matches!(
            services.resolve(&by_email).await,
            Err(LedgerError::InvalidCustomerId(_))
        ));

        let services = services.with_directory(store);
        assert_eq!(services.resolve(&by_email).await.unwrap(), reader);
        assert_eq!(
            services.resolve(&CustomerRef::Id(reader.clone())).await.unwrap(),
            reader
        );
        assert!(matches!(
            services
                .resolve(&CustomerRef::Email("nobody@example.com".to_string()))
                .await,
            Err(LedgerError::Store(StoreError::CustomerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_wiring() {
        let mut config = Config::for_test();
        config.ledger.points_expiry_days = -1;
        let result = build_services_with(
            &config,
            Arc::new(InMemoryMetafieldStore::new()),
            Arc::new(InMemoryDiscountService::new()),
        )
        .await;
        assert!(result.is_err());

        let mut config = Config::for_test();
        config.lock.backend = LockBackend::Redis;
        config.lock.lease_ms = Some(5000);
        let result = build_services_with(
            &config,
            Arc::new(InMemoryMetafieldStore::new()),
            Arc::new(InMemoryDiscountService::new()),
        )
        .await;
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("lock.lease_ms"));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_needs_feature() {
        let mut config = Config::for_test();
        config.lock.backend = LockBackend::Redis;
        let result = build_services_with(
            &config,
            Arc::new(InMemoryMetafieldStore::new()),
            Arc::new(InMemoryDiscountService::new()),
        )
        .await;
        assert!(result.is_err());
    }
}
