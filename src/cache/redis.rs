//! Redis balance cache, shared across processes.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use tracing::{debug, info, warn};

use super::BalanceCache;
use crate::model::CustomerId;

pub struct RedisBalanceCache {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisBalanceCache {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for cache keys (default: "points")
    /// * `ttl` - Entry lifetime
    pub async fn new(url: &str, key_prefix: Option<&str>, ttl: Duration) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for balance cache");

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or("points").to_string(),
            ttl,
        })
    }

    fn balance_key(&self, customer: &CustomerId) -> String {
        format!("{}:{}", self.key_prefix, customer)
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn get(&self, customer: &CustomerId) -> Option<u64> {
        let key = self.balance_key(customer);
        let mut conn = self.conn.clone();

        let cached: RedisResult<Option<u64>> = conn.get(&key).await;
        match cached {
            Ok(value) => {
                debug!(customer_id = %customer, hit = value.is_some(), "Balance cache lookup");
                value
            }
            Err(e) => {
                warn!(customer_id = %customer, error = %e, "Balance cache read failed");
                None
            }
        }
    }

    async fn put(&self, customer: &CustomerId, balance: u64) {
        let key = self.balance_key(customer);
        let mut conn = self.conn.clone();

        let stored: RedisResult<()> = conn.set_ex(&key, balance, self.ttl.as_secs().max(1)).await;
        if let Err(e) = stored {
            warn!(customer_id = %customer, error = %e, "Balance cache write failed");
        }
    }

    async fn invalidate(&self, customer: &CustomerId) {
        let key = self.balance_key(customer);
        let mut conn = self.conn.clone();

        let deleted: RedisResult<()> = conn.del(&key).await;
        if let Err(e) = deleted {
            warn!(customer_id = %customer, error = %e, "Balance cache invalidation failed");
        }
    }
}
