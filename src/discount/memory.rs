//! In-memory discount service for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DiscountError, DiscountRequest, DiscountService, Result};

/// Mock discount service that records discounts in memory.
#[derive(Default)]
pub struct InMemoryDiscountService {
    discounts: RwLock<HashMap<String, DiscountRequest>>,
    fail_on_create: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
    next_id: AtomicU32,
    creates: AtomicU32,
    deletes: AtomicU32,
}

impl InMemoryDiscountService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        *self.fail_on_create.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    /// Discounts currently live.
    pub async fn active(&self) -> Vec<(String, DiscountRequest)> {
        let mut active: Vec<_> = self
            .discounts
            .read()
            .await
            .iter()
            .map(|(id, req)| (id.clone(), req.clone()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    /// Create attempts, including failed ones.
    pub fn create_calls(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Delete attempts, including failed ones.
    pub fn delete_calls(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscountService for InMemoryDiscountService {
    async fn create_discount(&self, request: &DiscountRequest) -> Result<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_create.read().await {
            return Err(DiscountError::Unavailable(
                "injected create failure".to_string(),
            ));
        }
        let mut discounts = self.discounts.write().await;
        if discounts.values().any(|d| d.code == request.code) {
            return Err(DiscountError::Rejected(format!(
                "code {} already exists",
                request.code
            )));
        }
        let id = format!(
            "gid://shopify/DiscountCodeNode/{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        );
        discounts.insert(id.clone(), request.clone());
        Ok(id)
    }

    async fn delete_discount(&self, discount_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_delete.read().await {
            return Err(DiscountError::Unavailable(
                "injected delete failure".to_string(),
            ));
        }
        self.discounts
            .write()
            .await
            .remove(discount_id)
            .map(|_| ())
            .ok_or_else(|| DiscountError::Rejected(format!("unknown discount {}", discount_id)))
    }
}
