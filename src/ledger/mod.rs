//! Points ledger.
//!
//! [`PointsLedger`] is the explicit context object for ledger operations: it
//! holds the store client, lock table, balance cache, clock and task catalog,
//! constructed once and cloned cheaply into each operation. Every mutation
//! follows the same shape: acquire the customer lock, read the full
//! snapshot, compute the new state in memory, persist it as one batch
//! write, invalidate the cached balance.

pub mod batches;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::{BalanceCache, MemoryBalanceCache};
use crate::catalog::{Cadence, Qualification, Task, TaskCatalog, COMPLETE_ORDER_TASK};
use crate::clock::{Clock, StoreCalendar, SystemClock};
use crate::error::{LedgerError, Result};
use crate::lock::CustomerLocks;
use crate::model::schema::{self, LedgerField};
use crate::model::{
    CompletedTaskRecord, CustomerId, CustomerLedgerSnapshot, HistoryEntry, PointBatch, Voucher,
};
use crate::store::MetafieldStore;

pub use batches::{consume_fifo, sweep_expired, valid_balance, Shortfall};

/// Default lifetime of an earned batch.
pub const DEFAULT_POINTS_EXPIRY_DAYS: i64 = 60;
/// Default number of history entries retained.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Ledger policy constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub points_expiry: Duration,
    pub history_limit: usize,
    pub calendar: StoreCalendar,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            points_expiry: Duration::days(DEFAULT_POINTS_EXPIRY_DAYS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            calendar: StoreCalendar::default(),
        }
    }
}

/// Result of a task completion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskOutcome {
    Completed {
        task_id: String,
        task_name: String,
        points_earned: u64,
        new_balance: u64,
        expires_at: DateTime<Utc>,
    },
    /// The task's cadence does not allow another completion yet.
    AlreadyCompleted { task_id: String, task_name: String },
    /// The submitted metadata does not meet the task's qualifying condition.
    NotQualified {
        task_id: String,
        task_name: String,
        missing: u64,
        unit: String,
    },
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn points_earned(&self) -> u64 {
        match self {
            TaskOutcome::Completed { points_earned, .. } => *points_earned,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            TaskOutcome::Completed {
                task_name,
                points_earned,
                ..
            } => format!("Completed \"{}\"! +{} points", task_name, points_earned),
            TaskOutcome::AlreadyCompleted { task_name, .. } => {
                format!("You have already completed \"{}\" today", task_name)
            }
            TaskOutcome::NotQualified { missing, unit, .. } => {
                format!("{} more {} needed", missing, unit)
            }
        }
    }

    /// Caller-facing shape: `{success, message, status, ...}`.
    pub fn response(&self) -> OutcomeResponse<'_, Self> {
        OutcomeResponse {
            success: self.success(),
            message: self.message(),
            outcome: self,
        }
    }
}

/// Outcome with an explicit success flag and human-readable message.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse<'a, T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub outcome: &'a T,
}

/// A valid batch as presented to the customer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub points: u64,
    pub earned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: String,
    pub days_left: i64,
}

/// Read-only overview of a customer's loyalty state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub points: u64,
    pub completed_tasks: BTreeMap<String, CompletedTaskRecord>,
    pub available_tasks: Vec<Task>,
    pub history: Vec<HistoryEntry>,
    pub points_batches: Vec<BatchView>,
    pub vouchers: Vec<Voucher>,
}

#[derive(Clone)]
pub struct PointsLedger {
    store: Arc<dyn MetafieldStore>,
    locks: CustomerLocks,
    cache: Arc<dyn BalanceCache>,
    clock: Arc<dyn Clock>,
    catalog: Arc<TaskCatalog>,
    settings: LedgerSettings,
}

impl PointsLedger {
    /// Ledger over `store` with local locks, a memory cache, the wall clock
    /// and the built-in catalog.
    pub fn new(store: Arc<dyn MetafieldStore>) -> Self {
        Self {
            store,
            locks: CustomerLocks::local(),
            cache: Arc::new(MemoryBalanceCache::default()),
            clock: Arc::new(SystemClock),
            catalog: Arc::new(TaskCatalog::default()),
            settings: LedgerSettings::default(),
        }
    }

    pub fn with_locks(mut self, locks: CustomerLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn BalanceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_catalog(mut self, catalog: TaskCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_settings(mut self, settings: LedgerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn MetafieldStore> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &CustomerLocks {
        &self.locks
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn load_snapshot(&self, customer: &CustomerId) -> Result<CustomerLedgerSnapshot> {
        let fields = self
            .store
            .get_fields(customer, schema::SNAPSHOT_FIELDS)
            .await?;
        Ok(schema::decode_snapshot(customer, &fields))
    }

    /// Snapshot a mutation will rewrite. Fails rather than drop stored value.
    pub(crate) async fn load_snapshot_for_write(
        &self,
        customer: &CustomerId,
    ) -> Result<CustomerLedgerSnapshot> {
        let fields = self
            .store
            .get_fields(customer, schema::SNAPSHOT_FIELDS)
            .await?;
        Ok(schema::decode_snapshot_for_write(customer, &fields)?)
    }

    pub(crate) async fn invalidate_balance(&self, customer: &CustomerId) {
        self.cache.invalidate(customer).await;
    }

    /// Current valid balance. Read-only, may be served from the cache.
    pub async fn get_balance(&self, customer: &CustomerId) -> Result<u64> {
        if let Some(balance) = self.cache.get(customer).await {
            debug!(customer_id = %customer, balance, "Balance cache hit");
            return Ok(balance);
        }

        let fields = self
            .store
            .get_fields(customer, &[schema::POINT_BATCHES_FIELD])
            .await?;
        let batches = schema::decode_batches(customer, &fields);
        let balance = valid_balance(&batches, self.now());

        self.cache.put(customer, balance).await;
        debug!(customer_id = %customer, balance, "Balance computed from store");
        Ok(balance)
    }

    /// Credit a task's points, honoring its cadence.
    ///
    /// `metadata` is recorded as given; qualifying conditions are not checked
    /// here (see [`Self::submit_task`]).
    pub async fn complete_task(
        &self,
        customer: &CustomerId,
        task_id: &str,
        metadata: Value,
    ) -> Result<TaskOutcome> {
        let task = self.task(task_id)?.clone();

        let ledger = self.clone();
        let owner = customer.clone();
        let outcome = self
            .locks
            .run(customer, move || async move {
                ledger.complete_task_locked(&owner, &task, metadata).await
            })
            .await??;
        Ok(outcome)
    }

    /// Check the task's qualifying condition, then complete it.
    pub async fn submit_task(
        &self,
        customer: &CustomerId,
        task_id: &str,
        metadata: Value,
    ) -> Result<TaskOutcome> {
        let task = self.task(task_id)?;
        if let Qualification::Short { missing, unit } = task.predicate.evaluate(&metadata) {
            debug!(customer_id = %customer, task_id, missing, unit, "Task not qualified");
            return Ok(TaskOutcome::NotQualified {
                task_id: task.id.clone(),
                task_name: task.display_name.clone(),
                missing,
                unit: unit.to_string(),
            });
        }
        self.complete_task(customer, task_id, metadata).await
    }

    /// Order-paid trigger.
    pub async fn record_order_paid(
        &self,
        customer: &CustomerId,
        order_id: &str,
    ) -> Result<TaskOutcome> {
        self.complete_task(customer, COMPLETE_ORDER_TASK, json!({ "orderId": order_id }))
            .await
    }

    /// Overview for display. Read-only: legacy shapes are repaired in the
    /// returned value only, never written back.
    pub async fn progress(&self, customer: &CustomerId) -> Result<Progress> {
        let snapshot = self.load_snapshot(customer).await?;
        let now = self.now();

        let points_batches = snapshot
            .point_batches
            .iter()
            .filter(|b| b.is_valid_at(now))
            .map(|b| BatchView {
                points: b.points,
                earned_at: b.earned_at,
                expires_at: b.expires_at,
                source: b.source.clone(),
                days_left: days_until(now, b.expires_at),
            })
            .collect();

        Ok(Progress {
            points: valid_balance(&snapshot.point_batches, now),
            completed_tasks: snapshot.completed_tasks,
            available_tasks: self.catalog.tasks().to_vec(),
            history: snapshot.history,
            points_batches,
            vouchers: snapshot.vouchers,
        })
    }

    /// Clear all loyalty state for a customer.
    pub async fn reset(&self, customer: &CustomerId) -> Result<()> {
        let ledger = self.clone();
        let owner = customer.clone();
        self.locks
            .run(customer, move || async move {
                let writes = schema::encode_fields(
                    &CustomerLedgerSnapshot::default(),
                    0,
                    &[
                        LedgerField::CompletedTasks,
                        LedgerField::PointBatches,
                        LedgerField::History,
                        LedgerField::Vouchers,
                    ],
                )?;
                ledger.store.set_fields(&owner, writes).await?;
                ledger.invalidate_balance(&owner).await;
                info!(customer_id = %owner, "Loyalty state reset");
                Ok::<(), LedgerError>(())
            })
            .await??;
        Ok(())
    }

    fn task(&self, task_id: &str) -> Result<&Task> {
        self.catalog
            .get(task_id)
            .ok_or_else(|| LedgerError::TaskNotFound(task_id.to_string()))
    }

    async fn complete_task_locked(
        &self,
        customer: &CustomerId,
        task: &Task,
        metadata: Value,
    ) -> Result<TaskOutcome> {
        let now = self.now();
        let today = self.settings.calendar.day_of(now);
        let mut snapshot = self.load_snapshot_for_write(customer).await?;

        let previous = snapshot.completed_tasks.get(&task.id);
        let blocked = match task.cadence {
            Cadence::Daily => previous.is_some_and(|r| r.last_completed == today),
            Cadence::Once => previous.is_some_and(|r| r.count > 0),
            Cadence::Unlimited => false,
        };
        if blocked {
            debug!(customer_id = %customer, task_id = %task.id, "Task already completed");
            return Ok(TaskOutcome::AlreadyCompleted {
                task_id: task.id.clone(),
                task_name: task.display_name.clone(),
            });
        }
        let count = previous.map_or(0, |r| r.count) + 1;

        let expires_at = now + self.settings.points_expiry;
        let mut batches = std::mem::take(&mut snapshot.point_batches);
        batches.push(PointBatch {
            points: task.points,
            earned_at: now,
            expires_at,
            source: task.batch_source(),
        });
        snapshot.point_batches = sweep_expired(batches, now);
        let new_balance = valid_balance(&snapshot.point_batches, now);

        snapshot.completed_tasks.insert(
            task.id.clone(),
            CompletedTaskRecord {
                completed_at: now,
                last_completed: today,
                count,
                metadata,
            },
        );
        snapshot.push_history(
            HistoryEntry::Earn {
                points: i64::try_from(task.points).unwrap_or(i64::MAX),
                task_id: task.id.clone(),
                task_name: task.display_name.clone(),
                timestamp: now,
            },
            self.settings.history_limit,
        );

        let writes = schema::encode_fields(
            &snapshot,
            new_balance,
            &[
                LedgerField::CompletedTasks,
                LedgerField::PointBatches,
                LedgerField::History,
            ],
        )?;
        self.store.set_fields(customer, writes).await?;
        self.invalidate_balance(customer).await;

        info!(
            customer_id = %customer,
            task_id = %task.id,
            points = task.points,
            balance = new_balance,
            "Task completed"
        );

        Ok(TaskOutcome::Completed {
            task_id: task.id.clone(),
            task_name: task.display_name.clone(),
            points_earned: task.points,
            new_balance,
            expires_at,
        })
    }
}

/// Whole days until `until`, rounded up.
fn days_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let seconds = (until - now).num_seconds();
    let day = Duration::days(1).num_seconds();
    (seconds + day - 1).div_euclid(day)
}

#[cfg(test)]
mod tests;
