//! In-memory metafield store.
//!
//! Used by tests and local runs. Supports fault injection, artificial
//! latency between read and write, and a log of every accepted batch write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CustomerDirectory, FieldMap, FieldWrite, MetafieldStore, Result, StoreError};
use crate::model::CustomerId;

/// Mock metafield store that keeps records in memory.
#[derive(Default)]
pub struct InMemoryMetafieldStore {
    records: RwLock<HashMap<CustomerId, FieldMap>>,
    latency: RwLock<Option<Duration>>,
    fail_on_get: RwLock<bool>,
    fail_on_set: RwLock<bool>,
    /// When true, unknown customers are auto-created on first access.
    open: bool,
    write_log: RwLock<Vec<(CustomerId, Vec<FieldWrite>)>>,
    reads: AtomicU32,
    emails: RwLock<HashMap<String, CustomerId>>,
}

impl InMemoryMetafieldStore {
    /// Store that auto-creates customers on first access.
    pub fn new() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    /// Store that only knows customers registered with [`Self::add_customer`].
    pub fn strict() -> Self {
        Self::default()
    }

    pub async fn add_customer(&self, customer: &CustomerId) {
        self.records
            .write()
            .await
            .entry(customer.clone())
            .or_default();
    }

    /// Register a customer under an email address.
    pub async fn add_customer_with_email(&self, customer: &CustomerId, email: &str) {
        self.add_customer(customer).await;
        self.emails
            .write()
            .await
            .insert(email.trim().to_ascii_lowercase(), customer.clone());
    }

    /// Seed a raw field value, bypassing the write log.
    pub async fn put_raw(&self, customer: &CustomerId, key: &str, value: &str) {
        self.records
            .write()
            .await
            .entry(customer.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub async fn raw(&self, customer: &CustomerId, key: &str) -> Option<String> {
        self.records
            .read()
            .await
            .get(customer)
            .and_then(|fields| fields.get(key).cloned())
    }

    /// Delay applied to every read and write.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_set(&self, fail: bool) {
        *self.fail_on_set.write().await = fail;
    }

    /// Accepted batch writes, oldest first.
    pub async fn writes(&self) -> Vec<(CustomerId, Vec<FieldWrite>)> {
        self.write_log.read().await.clone()
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MetafieldStore for InMemoryMetafieldStore {
    async fn get_fields(&self, customer: &CustomerId, keys: &[&str]) -> Result<FieldMap> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if *self.fail_on_get.read().await {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }

        let records = self.records.read().await;
        match records.get(customer) {
            Some(fields) => Ok(keys
                .iter()
                .filter_map(|k| fields.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect()),
            None if self.open => Ok(FieldMap::new()),
            None => Err(StoreError::CustomerNotFound(customer.to_string())),
        }
    }

    async fn set_fields(&self, customer: &CustomerId, fields: Vec<FieldWrite>) -> Result<()> {
        self.simulate_latency().await;
        if *self.fail_on_set.read().await {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut records = self.records.write().await;
        if !self.open && !records.contains_key(customer) {
            return Err(StoreError::CustomerNotFound(customer.to_string()));
        }
        let record = records.entry(customer.clone()).or_default();
        for field in &fields {
            record.insert(field.key.clone(), field.value.clone());
        }
        drop(records);

        self.write_log.write().await.push((customer.clone(), fields));
        Ok(())
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryMetafieldStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<CustomerId>> {
        if *self.fail_on_get.read().await {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(self
            .emails
            .read()
            .await
            .get(&email.trim().to_ascii_lowercase())
            .cloned())
    }
}
