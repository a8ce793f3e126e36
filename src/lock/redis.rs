//! Redis-backed customer lock.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use tracing::{info, warn};

use super::{CustomerLock, LockError, LockLease, Result, DEFAULT_POLL_INTERVAL};
use crate::model::CustomerId;

/// Delete the key only if it still carries our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

/// Cluster-wide customer lock.
///
/// The lease expires after `lease` even if the holder never releases it, and
/// is never extended. The token fences release only: metafield writes have no
/// compare-and-set, so a section that outlives its lease can overwrite the
/// next holder's write. The lease must exceed the longest critical section
/// (see [`crate::config::LockConfig::validate`]).
pub struct RedisLock {
    conn: ConnectionManager,
    key_prefix: String,
    lease: Duration,
    poll_interval: Duration,
}

impl RedisLock {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for lock keys (default: "lock:customer")
    /// * `lease` - Expiry of an acquired lock
    pub async fn new(url: &str, key_prefix: Option<&str>, lease: Duration) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for customer locks");

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or("lock:customer").to_string(),
            lease,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn lock_key(&self, customer: &CustomerId) -> String {
        format!("{}:{}", self.key_prefix, customer)
    }
}

#[async_trait]
impl CustomerLock for RedisLock {
    async fn acquire(&self, customer: &CustomerId, timeout: Duration) -> Result<LockLease> {
        let key = self.lock_key(customer);
        let lease = LockLease::new(customer.clone());
        let lease_ms = u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX);
        let start = Instant::now();
        let mut conn = self.conn.clone();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(lease.token())
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(lease);
            }
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    customer: customer.to_string(),
                    waited: start.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, lease: LockLease) -> Result<()> {
        let key = self.lock_key(lease.customer());
        let mut conn = self.conn.clone();

        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            warn!(
                customer_id = %lease.customer(),
                "Lock lease expired before release; left current holder untouched"
            );
        }
        Ok(())
    }
}
