//! In-process customer lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use super::{CustomerLock, LockError, LockLease, Result};
use crate::model::CustomerId;

/// Table of per-customer fair mutexes.
///
/// Waiters are served in arrival order. Entries are dropped once nobody
/// holds or waits on them, so the table only grows with live contention.
#[derive(Default)]
pub struct LocalLock {
    table: Mutex<HashMap<CustomerId, Arc<AsyncMutex<()>>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Customers with a holder or waiter.
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn slot(&self, customer: &CustomerId) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(table.entry(customer.clone()).or_default())
    }

    fn prune(&self, customer: &CustomerId) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = table.get(customer) {
            if Arc::strong_count(slot) == 1 {
                table.remove(customer);
            }
        }
    }
}

#[async_trait]
impl CustomerLock for LocalLock {
    async fn acquire(&self, customer: &CustomerId, timeout: Duration) -> Result<LockLease> {
        let slot = self.slot(customer);
        let acquired = tokio::time::timeout(timeout, slot.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(LockLease::new(customer.clone()).holding(guard)),
            Err(_) => {
                self.prune(customer);
                Err(LockError::Timeout {
                    customer: customer.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    async fn release(&self, mut lease: LockLease) -> Result<()> {
        drop(lease.guard.take());
        self.prune(lease.customer());
        Ok(())
    }
}
