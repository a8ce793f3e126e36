//! Per-customer mutual exclusion.
//!
//! Every ledger mutation for a customer runs inside [`CustomerLocks::with_lock`].
//! Two backends:
//! - `LocalLock`: in-process table of fair async mutexes. Exclusion only holds
//!   within one process.
//! - `RedisLock` (feature `redis`): `SET NX PX` with a fencing token, so a
//!   holder whose lease expired cannot release a lock taken by someone else.
//!
//! Once acquired, the critical section runs on its own task. A caller that
//! stops waiting does not cancel it, and release happens on every exit path,
//! including a panic inside the section.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::model::CustomerId;

mod local;
#[cfg(feature = "redis")]
mod redis;

pub use local::LocalLock;
#[cfg(feature = "redis")]
pub use self::redis::RedisLock;

/// Default acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Default retry interval for backends that poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    #[error("Lock timeout for customer {customer} after {waited:?}")]
    Timeout { customer: String, waited: Duration },

    #[error("Lock backend error: {0}")]
    Backend(String),

    #[error("Critical section for customer {0} aborted")]
    Aborted(String),
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for LockError {
    fn from(e: ::redis::RedisError) -> Self {
        LockError::Backend(e.to_string())
    }
}

/// Proof of lock ownership, handed back to the backend on release.
#[derive(Debug)]
pub struct LockLease {
    customer: CustomerId,
    token: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockLease {
    /// Lease with a fresh random fencing token.
    pub fn new(customer: CustomerId) -> Self {
        Self {
            customer,
            token: hex::encode(Uuid::new_v4().as_bytes()),
            guard: None,
        }
    }

    pub(crate) fn holding(mut self, guard: OwnedMutexGuard<()>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn customer(&self) -> &CustomerId {
        &self.customer
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Lock backend.
#[async_trait]
pub trait CustomerLock: Send + Sync {
    /// Block until the customer's lock is held or `timeout` elapses.
    async fn acquire(&self, customer: &CustomerId, timeout: Duration) -> Result<LockLease>;

    /// Release a lease. Releasing a lease that is no longer current is a no-op.
    async fn release(&self, lease: LockLease) -> Result<()>;
}

/// Scoped acquisition over a lock backend.
#[derive(Clone)]
pub struct CustomerLocks {
    backend: Arc<dyn CustomerLock>,
    timeout: Duration,
}

impl CustomerLocks {
    pub fn new(backend: Arc<dyn CustomerLock>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// In-process locks with the default timeout.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalLock::new()), DEFAULT_LOCK_TIMEOUT)
    }

    /// Configured acquisition timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `section` while holding the customer's lock.
    ///
    /// Fails with `LockError::Timeout` when the lock is not acquired within
    /// `timeout`, and with `LockError::Aborted` when the section panics.
    pub async fn with_lock<F, Fut, T>(
        &self,
        customer: &CustomerId,
        timeout: Duration,
        section: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.backend.acquire(customer, timeout).await?;
        debug!(customer_id = %customer, token = %lease.token(), "Customer lock acquired");

        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { section().await })
                .catch_unwind()
                .await;
            let customer = lease.customer().clone();
            if let Err(e) = backend.release(lease).await {
                warn!(customer_id = %customer, error = %e, "Failed to release customer lock");
            }
            outcome
        });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                error!(customer_id = %customer, "Critical section panicked");
                Err(LockError::Aborted(customer.to_string()))
            }
            Err(e) => {
                error!(customer_id = %customer, error = %e, "Critical section task failed");
                Err(LockError::Aborted(customer.to_string()))
            }
        }
    }

    /// [`Self::with_lock`] using the configured timeout.
    pub async fn run<F, Fut, T>(&self, customer: &CustomerId, section: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_lock(customer, self.timeout, section).await
    }
}

impl Default for CustomerLocks {
    fn default() -> Self {
        Self::local()
    }
}
