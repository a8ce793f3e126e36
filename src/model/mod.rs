//! Ledger data model.
//!
//! Everything a customer owns in the loyalty program lives in one
//! [`CustomerLedgerSnapshot`]. The snapshot is read wholesale from the
//! metafield store and written back wholesale; there is no row-level update.

mod customer;
pub mod schema;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use customer::{CustomerId, CustomerRef, CUSTOMER_GID_PREFIX};

/// A quantity of points earned at one time with its own expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointBatch {
    /// Remaining points. Shrinks on redemption, never negative.
    pub points: u64,
    pub earned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Provenance tag, e.g. `task_login`.
    #[serde(default)]
    pub source: String,
}

impl PointBatch {
    /// A batch counts toward the balance only while `expires_at > now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Per-task completion state, keyed by task id in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTaskRecord {
    pub completed_at: DateTime<Utc>,
    /// Store-local calendar day (`YYYY-MM-DD`) of the latest completion.
    pub last_completed: String,
    pub count: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Balance-affecting event, stored newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryEntry {
    #[serde(rename_all = "camelCase")]
    Earn {
        points: i64,
        task_id: String,
        task_name: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Redeem {
        points: i64,
        voucher_code: String,
        voucher_value: u64,
        timestamp: DateTime<Utc>,
    },
}

impl HistoryEntry {
    /// Signed point delta (+earn, -redeem).
    pub fn points(&self) -> i64 {
        match self {
            HistoryEntry::Earn { points, .. } | HistoryEntry::Redeem { points, .. } => *points,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryEntry::Earn { timestamp, .. } | HistoryEntry::Redeem { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Active,
    Revoked,
}

/// Redemption artifact backed by an externally created discount code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub code: String,
    pub points_used: u64,
    pub discount_value: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: VoucherStatus,
    /// Identifier of the discount in the external commerce platform.
    pub discount_id: String,
}

/// Aggregate of all loyalty state for one customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerLedgerSnapshot {
    pub completed_tasks: BTreeMap<String, CompletedTaskRecord>,
    pub point_batches: Vec<PointBatch>,
    pub history: Vec<HistoryEntry>,
    pub vouchers: Vec<Voucher>,
}

impl CustomerLedgerSnapshot {
    /// Prepend an entry and evict the oldest beyond `limit`.
    pub fn push_history(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.insert(0, entry);
        self.history.truncate(limit);
    }
}
