//! Loyalty points ledger.
//!
//! Keeps a customer's loyalty balance as a set of expiring point batches
//! stored in Shopify customer metafields, credits daily tasks at most once
//! per store-local day, and redeems points FIFO for single-use discount codes.
//! All mutations for one customer are serialized by a per-customer lock.

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod discount;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod model;
pub mod redemption;
pub mod services;
pub mod shopify;
pub mod store;
pub mod utils;

pub use error::{LedgerError, Result};
pub use ledger::{PointsLedger, Progress, TaskOutcome};
pub use model::CustomerId;
pub use redemption::{RedeemOutcome, RedemptionEngine};
