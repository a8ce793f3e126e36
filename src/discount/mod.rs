//! External discount side effect.
//!
//! Redemption creates a single-use discount code on the commerce platform.
//! The ledger treats it as an opaque create/delete pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::CustomerId;

pub mod memory;

pub use memory::InMemoryDiscountService;

/// Result type for discount operations.
pub type Result<T> = std::result::Result<T, DiscountError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscountError {
    #[error("Discount rejected: {0}")]
    Rejected(String),

    #[error("Discount service unavailable: {0}")]
    Unavailable(String),
}

/// Parameters of a customer-specific fixed-amount discount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountRequest {
    pub customer: CustomerId,
    pub code: String,
    /// Fixed amount off the order, in store currency units.
    pub amount: u64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Interface for creating and revoking discount codes.
#[async_trait]
pub trait DiscountService: Send + Sync {
    /// Create the discount and return its external identifier.
    async fn create_discount(&self, request: &DiscountRequest) -> Result<String>;

    /// Delete a previously created discount.
    async fn delete_discount(&self, discount_id: &str) -> Result<()>;
}
