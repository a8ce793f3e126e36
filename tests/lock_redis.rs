//! Redis lock and balance cache integration tests.
//!
//! Run with: cargo test --test lock_redis --features redis -- --ignored --nocapture
//!
//! Requires: REDIS_URI env var or Redis on localhost:6379
//!
//! Note: Tests use unique key prefixes to avoid data conflicts between runs.

use std::sync::Arc;
use std::time::Duration;

use loyalty_ledger::cache::{BalanceCache, RedisBalanceCache};
use loyalty_ledger::lock::{CustomerLock, CustomerLocks, LockError, RedisLock};
use loyalty_ledger::CustomerId;

fn redis_uri() -> String {
    std::env::var("REDIS_URI").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn test_prefix() -> String {
    format!("test_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn customer() -> CustomerId {
    CustomerId::parse("424242").unwrap()
}

async fn connect_lock(prefix: &str, lease: Duration) -> RedisLock {
    RedisLock::new(&redis_uri(), Some(prefix), lease)
        .await
        .expect("Failed to connect to Redis")
        .with_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_lock_excludes_second_holder() {
    let prefix = test_prefix();
    let lock = connect_lock(&prefix, Duration::from_secs(5)).await;

    let lease = lock
        .acquire(&customer(), Duration::from_millis(100))
        .await
        .unwrap();

    let second = lock.acquire(&customer(), Duration::from_millis(100)).await;
    assert!(matches!(second, Err(LockError::Timeout { .. })));

    lock.release(lease).await.unwrap();
    let third = lock
        .acquire(&customer(), Duration::from_millis(100))
        .await
        .unwrap();
    lock.release(third).await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_lock_stale_release_keeps_new_holder() {
    let prefix = test_prefix();
    let lock = connect_lock(&prefix, Duration::from_millis(100)).await;

    let stale = lock
        .acquire(&customer(), Duration::from_millis(100))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let current = lock
        .acquire(&customer(), Duration::from_millis(100))
        .await
        .unwrap();
    assert_ne!(stale.token(), current.token());

    // Token no longer matches; the current holder must keep the lock.
    lock.release(stale).await.unwrap();
    let contender = lock.acquire(&customer(), Duration::from_millis(50)).await;
    assert!(matches!(contender, Err(LockError::Timeout { .. })));

    lock.release(current).await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_lock_serializes_sections() {
    let prefix = test_prefix();
    let locks = CustomerLocks::new(
        Arc::new(connect_lock(&prefix, Duration::from_secs(5)).await),
        Duration::from_secs(5),
    );
    let counter = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let locks = locks.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                locks
                    .run(&customer(), move || async move {
                        counter.lock().await.push(("enter", i));
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        counter.lock().await.push(("exit", i));
                    })
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let events = counter.lock().await;
    for pair in events.chunks(2) {
        assert_eq!(pair[0].0, "enter");
        assert_eq!(pair[1], ("exit", pair[0].1));
    }
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_balance_cache() {
    let prefix = test_prefix();
    let cache = RedisBalanceCache::new(&redis_uri(), Some(&prefix), Duration::from_secs(60))
        .await
        .expect("Failed to connect to Redis");
    let c = customer();

    assert_eq!(cache.get(&c).await, None);
    cache.put(&c, 120).await;
    assert_eq!(cache.get(&c).await, Some(120));
    cache.invalidate(&c).await;
    assert_eq!(cache.get(&c).await, None);
}
