//! Short-lived balance cache.
//!
//! Balance reads may be served from here for up to the configured TTL.
//! Every successful ledger write invalidates the customer's entry. Cache
//! failures are logged and otherwise ignored: a miss just reads the store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::model::CustomerId;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisBalanceCache;

/// Default entry lifetime.
pub const DEFAULT_BALANCE_TTL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, customer: &CustomerId) -> Option<u64>;

    async fn put(&self, customer: &CustomerId, balance: u64);

    async fn invalidate(&self, customer: &CustomerId);
}

/// Process-local TTL cache.
pub struct MemoryBalanceCache {
    ttl: Duration,
    entries: RwLock<HashMap<CustomerId, (u64, Instant)>>,
}

impl MemoryBalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBalanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE_TTL)
    }
}

#[async_trait]
impl BalanceCache for MemoryBalanceCache {
    async fn get(&self, customer: &CustomerId) -> Option<u64> {
        let entries = self.entries.read().await;
        entries
            .get(customer)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(balance, _)| *balance)
    }

    async fn put(&self, customer: &CustomerId, balance: u64) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() < self.ttl);
        entries.insert(customer.clone(), (balance, Instant::now()));
    }

    async fn invalidate(&self, customer: &CustomerId) {
        self.entries.write().await.remove(customer);
    }
}

/// Cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBalanceCache;

#[async_trait]
impl BalanceCache for NoopBalanceCache {
    async fn get(&self, _customer: &CustomerId) -> Option<u64> {
        None
    }

    async fn put(&self, _customer: &CustomerId, _balance: u64) {}

    async fn invalidate(&self, _customer: &CustomerId) {}
}
