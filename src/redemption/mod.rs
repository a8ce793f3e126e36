//! Points redemption.
//!
//! Exchanges points for a customer-specific discount code. The whole
//! read-plan-create-persist sequence runs under the customer lock.

pub mod saga;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::discount::DiscountService;
use crate::error::{LedgerError, Result};
use crate::ledger::{valid_balance, OutcomeResponse, PointsLedger};
use crate::model::schema::{self, LedgerField};
use crate::model::{CustomerId, Voucher};
use crate::store::StoreError;

pub use saga::{compensate, CompensationOutcome, RedemptionPlan};

pub const DEFAULT_MINIMUM_POINTS: u64 = 300;
pub const DEFAULT_POINTS_STEP: u64 = 100;
pub const DEFAULT_VOUCHER_VALIDITY_DAYS: i64 = 30;
pub const DEFAULT_CODE_PREFIX: &str = "BOOK";

/// Which point amounts may be redeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedemptionPolicy {
    /// At least `minimum`, in multiples of `step`.
    MinimumMultiple { minimum: u64, step: u64 },
    /// Only the listed amounts.
    AllowList { amounts: Vec<u64> },
}

impl Default for RedemptionPolicy {
    fn default() -> Self {
        RedemptionPolicy::MinimumMultiple {
            minimum: DEFAULT_MINIMUM_POINTS,
            step: DEFAULT_POINTS_STEP,
        }
    }
}

impl RedemptionPolicy {
    pub fn validate(&self, points: u64) -> Result<()> {
        let invalid = |reason: String| {
            Err(LedgerError::InvalidAmount {
                requested: points,
                reason,
            })
        };

        if points == 0 {
            return invalid("amount must be positive".to_string());
        }
        match self {
            RedemptionPolicy::MinimumMultiple { minimum, step } => {
                if points < *minimum {
                    return invalid(format!("minimum is {} points", minimum));
                }
                if *step > 0 && points % step != 0 {
                    return invalid(format!("must be a multiple of {} points", step));
                }
                Ok(())
            }
            RedemptionPolicy::AllowList { amounts } => {
                if amounts.contains(&points) {
                    Ok(())
                } else {
                    invalid(format!("allowed amounts are {:?}", amounts))
                }
            }
        }
    }
}

/// Points-to-currency conversion: `value_per_unit` per `points_per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRate {
    pub points_per_unit: u64,
    pub value_per_unit: u64,
}

impl Default for ConversionRate {
    fn default() -> Self {
        Self {
            points_per_unit: 300,
            value_per_unit: 10_000,
        }
    }
}

impl ConversionRate {
    /// Discount value for `points`, rounded down.
    pub fn discount_for(&self, points: u64) -> u64 {
        if self.points_per_unit == 0 {
            return 0;
        }
        let value = u128::from(points) * u128::from(self.value_per_unit)
            / u128::from(self.points_per_unit);
        u64::try_from(value).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionSettings {
    pub policy: RedemptionPolicy,
    pub rate: ConversionRate,
    pub voucher_validity: Duration,
    pub code_prefix: String,
}

impl Default for RedemptionSettings {
    fn default() -> Self {
        Self {
            policy: RedemptionPolicy::default(),
            rate: ConversionRate::default(),
            voucher_validity: Duration::days(DEFAULT_VOUCHER_VALIDITY_DAYS),
            code_prefix: DEFAULT_CODE_PREFIX.to_string(),
        }
    }
}

/// Result of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RedeemOutcome {
    Redeemed { voucher: Voucher, new_balance: u64 },
    InsufficientPoints { available: u64, requested: u64 },
}

impl RedeemOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RedeemOutcome::Redeemed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            RedeemOutcome::Redeemed { voucher, .. } => format!(
                "Redeemed {} points for a {} discount: {}",
                voucher.points_used, voucher.discount_value, voucher.code
            ),
            RedeemOutcome::InsufficientPoints {
                available,
                requested,
            } => format!(
                "Not enough points: {} available, {} requested",
                available, requested
            ),
        }
    }

    pub fn response(&self) -> OutcomeResponse<'_, Self> {
        OutcomeResponse {
            success: self.success(),
            message: self.message(),
            outcome: self,
        }
    }
}

#[derive(Clone)]
pub struct RedemptionEngine {
    ledger: PointsLedger,
    discounts: Arc<dyn DiscountService>,
    settings: RedemptionSettings,
}

impl RedemptionEngine {
    /// Engine sharing `ledger`'s store, locks, cache and clock.
    pub fn new(ledger: PointsLedger, discounts: Arc<dyn DiscountService>) -> Self {
        Self {
            ledger,
            discounts,
            settings: RedemptionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RedemptionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RedemptionSettings {
        &self.settings
    }

    /// Exchange `points` for a voucher.
    ///
    /// Invalid amounts are rejected before the lock is taken. A discount
    /// creation failure changes nothing; a persistence failure after the
    /// discount exists triggers one compensating delete.
    pub async fn redeem(&self, customer: &CustomerId, points: u64) -> Result<RedeemOutcome> {
        self.settings.policy.validate(points)?;

        let engine = self.clone();
        let owner = customer.clone();
        let outcome = self
            .ledger
            .locks()
            .run(customer, move || async move {
                engine.redeem_locked(&owner, points).await
            })
            .await??;
        Ok(outcome)
    }

    async fn redeem_locked(&self, customer: &CustomerId, points: u64) -> Result<RedeemOutcome> {
        let now: DateTime<Utc> = self.ledger.now();
        let mut snapshot = self.ledger.load_snapshot_for_write(customer).await?;

        let plan = match RedemptionPlan::prepare(&snapshot.point_batches, points, now, &self.settings)
        {
            Ok(plan) => plan,
            Err(shortfall) => {
                debug!(
                    customer_id = %customer,
                    available = shortfall.available,
                    requested = points,
                    "Insufficient points"
                );
                return Ok(RedeemOutcome::InsufficientPoints {
                    available: shortfall.available,
                    requested: points,
                });
            }
        };

        let discount_id = self
            .discounts
            .create_discount(&plan.discount_request(customer))
            .await
            .map_err(|e| {
                warn!(customer_id = %customer, code = %plan.code, error = %e, "Discount creation failed");
                LedgerError::ExternalSideEffectFailed(e)
            })?;

        let voucher = plan.apply(&mut snapshot, discount_id.clone(), self.ledger.settings().history_limit);
        let new_balance = valid_balance(&snapshot.point_batches, now);

        let persisted = match schema::encode_fields(
            &snapshot,
            new_balance,
            &[
                LedgerField::PointBatches,
                LedgerField::Vouchers,
                LedgerField::History,
            ],
        ) {
            Ok(writes) => self.ledger.store().set_fields(customer, writes).await,
            Err(e) => Err(StoreError::Malformed(e.to_string())),
        };

        if let Err(source) = persisted {
            warn!(
                customer_id = %customer,
                discount_id = %discount_id,
                error = %source,
                "Redemption persistence failed, compensating"
            );
            let compensation = compensate(self.discounts.as_ref(), customer, &discount_id).await;
            return Err(LedgerError::PersistenceFailed {
                source,
                compensation,
            });
        }

        self.ledger.invalidate_balance(customer).await;

        info!(
            customer_id = %customer,
            points,
            code = %voucher.code,
            discount_value = voucher.discount_value,
            balance = new_balance,
            "Points redeemed"
        );

        Ok(RedeemOutcome::Redeemed {
            voucher,
            new_balance,
        })
    }
}
