//! Redemption saga steps.
//!
//! A redemption has one external side effect (the discount code) and one
//! persistence step. The plan is computed entirely in memory first; if
//! persistence fails after the discount exists, the discount is deleted
//! exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use super::RedemptionSettings;
use crate::discount::{DiscountRequest, DiscountService};
use crate::ledger::{consume_fifo, valid_balance, Shortfall};
use crate::model::{CustomerId, CustomerLedgerSnapshot, HistoryEntry, PointBatch, Voucher, VoucherStatus};

/// Result of undoing the external side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The discount was deleted.
    Compensated,
    /// The discount could not be deleted and remains live.
    Failed(String),
}

impl CompensationOutcome {
    pub fn is_compensated(&self) -> bool {
        matches!(self, CompensationOutcome::Compensated)
    }
}

impl fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompensationOutcome::Compensated => write!(f, "discount deleted"),
            CompensationOutcome::Failed(reason) => {
                write!(f, "discount left orphaned: {}", reason)
            }
        }
    }
}

/// Everything a redemption will change, computed before any side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionPlan {
    pub points: u64,
    pub discount_value: u64,
    pub code: String,
    pub remaining_batches: Vec<PointBatch>,
    pub new_balance: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RedemptionPlan {
    /// Plan consumption of `points` from `batches`.
    ///
    /// Fails with the valid balance when it does not cover `points`.
    pub fn prepare(
        batches: &[PointBatch],
        points: u64,
        now: DateTime<Utc>,
        settings: &RedemptionSettings,
    ) -> Result<Self, Shortfall> {
        let remaining_batches = consume_fifo(batches, points, now)?;
        let new_balance = valid_balance(&remaining_batches, now);

        Ok(Self {
            points,
            discount_value: settings.rate.discount_for(points),
            code: voucher_code(&settings.code_prefix, points),
            remaining_batches,
            new_balance,
            issued_at: now,
            expires_at: now + settings.voucher_validity,
        })
    }

    pub fn discount_request(&self, customer: &CustomerId) -> DiscountRequest {
        DiscountRequest {
            customer: customer.clone(),
            code: self.code.clone(),
            amount: self.discount_value,
            starts_at: self.issued_at,
            ends_at: self.expires_at,
        }
    }

    /// Fold the plan into `snapshot` once the discount exists.
    pub fn apply(
        &self,
        snapshot: &mut CustomerLedgerSnapshot,
        discount_id: String,
        history_limit: usize,
    ) -> Voucher {
        let voucher = Voucher {
            code: self.code.clone(),
            points_used: self.points,
            discount_value: self.discount_value,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            status: VoucherStatus::Active,
            discount_id,
        };

        snapshot.point_batches = self.remaining_batches.clone();
        snapshot.vouchers.push(voucher.clone());
        snapshot.push_history(
            HistoryEntry::Redeem {
                points: -i64::try_from(self.points).unwrap_or(i64::MAX),
                voucher_code: self.code.clone(),
                voucher_value: self.discount_value,
                timestamp: self.issued_at,
            },
            history_limit,
        );
        voucher
    }
}

/// Delete the discount created for a redemption whose persistence failed.
///
/// Called at most once per redemption; failures are logged, never retried.
pub async fn compensate(
    discounts: &dyn DiscountService,
    customer: &CustomerId,
    discount_id: &str,
) -> CompensationOutcome {
    match discounts.delete_discount(discount_id).await {
        Ok(()) => {
            info!(customer_id = %customer, discount_id, "Redemption compensated");
            CompensationOutcome::Compensated
        }
        Err(e) => {
            error!(
                customer_id = %customer,
                discount_id,
                error = %e,
                "Compensation failed, discount left orphaned"
            );
            CompensationOutcome::Failed(e.to_string())
        }
    }
}

/// `<prefix><points>_<8 upper-case hex>`.
fn voucher_code(prefix: &str, points: u64) -> String {
    let id = Uuid::new_v4();
    format!(
        "{}{}_{}",
        prefix,
        points,
        hex::encode_upper(&id.as_bytes()[..4])
    )
}
