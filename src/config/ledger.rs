//! Ledger and redemption policy configuration.

use std::path::PathBuf;

use chrono::Duration;
use serde::Deserialize;

use super::ConfigError;
use crate::catalog::{CatalogError, TaskCatalog};
use crate::clock::{StoreCalendar, DEFAULT_UTC_OFFSET_HOURS};
use crate::ledger::{LedgerSettings, DEFAULT_HISTORY_LIMIT, DEFAULT_POINTS_EXPIRY_DAYS};
use crate::redemption::{
    ConversionRate, RedemptionPolicy, RedemptionSettings, DEFAULT_CODE_PREFIX,
    DEFAULT_VOUCHER_VALIDITY_DAYS,
};

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Lifetime of an earned batch in days.
    pub points_expiry_days: i64,
    /// History entries retained per customer.
    pub history_limit: usize,
    /// Store-local UTC offset used for daily task boundaries.
    pub utc_offset_hours: i32,
    /// Task catalog override (YAML). Built-in tasks when unset.
    pub tasks_file: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            points_expiry_days: DEFAULT_POINTS_EXPIRY_DAYS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            tasks_file: None,
        }
    }
}

impl LedgerConfig {
    pub fn settings(&self) -> Result<LedgerSettings, ConfigError> {
        if !(-MAX_UTC_OFFSET_HOURS..=MAX_UTC_OFFSET_HOURS).contains(&self.utc_offset_hours) {
            return Err(ConfigError::invalid(
                "ledger.utc_offset_hours",
                format!(
                    "{} is outside -{}..={}",
                    self.utc_offset_hours, MAX_UTC_OFFSET_HOURS, MAX_UTC_OFFSET_HOURS
                ),
            ));
        }
        Ok(LedgerSettings {
            points_expiry: positive_days("ledger.points_expiry_days", self.points_expiry_days)?,
            history_limit: self.history_limit,
            calendar: StoreCalendar::with_offset_hours(self.utc_offset_hours),
        })
    }

    pub fn catalog(&self) -> Result<TaskCatalog, CatalogError> {
        match &self.tasks_file {
            Some(path) => TaskCatalog::from_yaml_file(path),
            None => Ok(TaskCatalog::default()),
        }
    }
}

/// Redemption configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Which point amounts may be redeemed.
    pub policy: RedemptionPolicy,
    pub points_per_unit: u64,
    pub value_per_unit: u64,
    /// Voucher lifetime in days.
    pub voucher_validity_days: i64,
    /// Voucher code prefix.
    pub code_prefix: String,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        let rate = ConversionRate::default();
        Self {
            policy: RedemptionPolicy::default(),
            points_per_unit: rate.points_per_unit,
            value_per_unit: rate.value_per_unit,
            voucher_validity_days: DEFAULT_VOUCHER_VALIDITY_DAYS,
            code_prefix: DEFAULT_CODE_PREFIX.to_string(),
        }
    }
}

impl RedemptionConfig {
    pub fn settings(&self) -> Result<RedemptionSettings, ConfigError> {
        if self.points_per_unit == 0 {
            return Err(ConfigError::invalid(
                "redemption.points_per_unit",
                "must be greater than zero",
            ));
        }
        Ok(RedemptionSettings {
            policy: self.policy.clone(),
            rate: ConversionRate {
                points_per_unit: self.points_per_unit,
                value_per_unit: self.value_per_unit,
            },
            voucher_validity: positive_days(
                "redemption.voucher_validity_days",
                self.voucher_validity_days,
            )?,
            code_prefix: self.code_prefix.clone(),
        })
    }
}

/// Longest accepted expiry or validity period.
pub const MAX_PERIOD_DAYS: i64 = 3650;
/// Widest whole-hour offset a store calendar may use.
pub const MAX_UTC_OFFSET_HOURS: i32 = 23;

fn positive_days(field: &'static str, days: i64) -> Result<Duration, ConfigError> {
    if !(1..=MAX_PERIOD_DAYS).contains(&days) {
        return Err(ConfigError::invalid(
            field,
            format!("{} is outside 1..={} days", days, MAX_PERIOD_DAYS),
        ));
    }
    Duration::try_days(days).ok_or_else(|| ConfigError::invalid(field, "out of range"))
}
