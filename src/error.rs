//! Ledger failure taxonomy.
//!
//! Only faults live here. Business outcomes such as an already-completed
//! daily task or an insufficient balance are returned as
//! [`crate::ledger::TaskOutcome`] / [`crate::redemption::RedeemOutcome`]
//! variants, never as errors.

use std::time::Duration;

use crate::discount::DiscountError;
use crate::lock::LockError;
use crate::redemption::CompensationOutcome;
use crate::store::StoreError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid customer ID format: {0}")]
    InvalidCustomerId(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid redemption amount {requested}: {reason}")]
    InvalidAmount { requested: u64, reason: String },

    #[error("Lock timeout for customer {customer} after {waited:?}")]
    LockTimeout { customer: String, waited: Duration },

    #[error("Customer lock failed: {0}")]
    Lock(LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Discount creation failed: {0}")]
    ExternalSideEffectFailed(#[source] DiscountError),

    #[error("Failed to persist redemption: {source} (compensation: {compensation})")]
    PersistenceFailed {
        #[source]
        source: StoreError,
        compensation: CompensationOutcome,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Transient infrastructure faults the caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::LockTimeout { .. } => true,
            LedgerError::Store(e) => e.is_retryable(),
            LedgerError::ExternalSideEffectFailed(DiscountError::Unavailable(_)) => true,
            _ => false,
        }
    }

    /// Input rejected before any lock or store interaction.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidCustomerId(_)
                | LedgerError::TaskNotFound(_)
                | LedgerError::InvalidAmount { .. }
        )
    }
}

impl From<LockError> for LedgerError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { customer, waited } => LedgerError::LockTimeout { customer, waited },
            other => LedgerError::Lock(other),
        }
    }
}
