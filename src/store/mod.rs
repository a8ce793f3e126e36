//! Metafield store interface.
//!
//! The store persists named string fields on a customer record and knows
//! nothing about batches or expiry. Implementations:
//! - `InMemoryMetafieldStore`: process-local, with fault injection for tests
//! - `ShopifyMetafieldStore`: GraphQL admin API (see [`crate::shopify`])

use std::collections::HashMap;

use async_trait::async_trait;

use crate::model::CustomerId;

pub mod memory;

pub use memory::InMemoryMetafieldStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw field values by key. Absent keys are simply missing.
pub type FieldMap = HashMap<String, String>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected write: {0}")]
    Validation(String),

    #[error("Malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Transport-level failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Storage type of a field as understood by the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Json,
    Integer,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Json => "json",
            FieldKind::Integer => "number_integer",
        }
    }
}

/// One field of a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWrite {
    pub key: String,
    pub value: String,
    pub kind: FieldKind,
}

impl FieldWrite {
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
        }
    }
}

/// Customer lookup by contact details.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Customer registered under `email`, if any.
    async fn find_by_email(&self, email: &str) -> Result<Option<CustomerId>>;
}

/// Interface for customer metafield persistence.
#[async_trait]
pub trait MetafieldStore: Send + Sync {
    /// Read the named fields for a customer.
    ///
    /// Fails with `CustomerNotFound` when the customer record does not exist.
    async fn get_fields(&self, customer: &CustomerId, keys: &[&str]) -> Result<FieldMap>;

    /// Persist a batch of fields. All fields are accepted or none are.
    async fn set_fields(&self, customer: &CustomerId, fields: Vec<FieldWrite>) -> Result<()>;
}
