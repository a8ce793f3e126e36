//! Stored field layout and schema migration.
//!
//! Every loyalty field is a JSON document stored under the customer's
//! metafield namespace. Reads go through [`decode_snapshot`], which migrates
//! legacy shapes once into typed structures; writes go through
//! [`encode_fields`], which always stamps the current schema version.
//!
//! Decoding for display never fails. A field in an unexpected shape decodes
//! to its default. Mutations decode with [`decode_snapshot_for_write`], which
//! only lets the next write replace fields that carry no points.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

use super::{CompletedTaskRecord, CustomerId, CustomerLedgerSnapshot, PointBatch};
use crate::store::{FieldKind, FieldMap, FieldWrite, StoreError};

/// Denormalized valid balance, kept for storefront templates.
pub const POINTS_FIELD: &str = "points";
pub const POINT_BATCHES_FIELD: &str = "points_batches";
pub const COMPLETED_TASKS_FIELD: &str = "completed_tasks";
pub const HISTORY_FIELD: &str = "points_history";
pub const VOUCHERS_FIELD: &str = "vouchers";
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

/// Version written by this crate. Records without a version field are legacy (0).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Field keys read for a full snapshot.
pub const SNAPSHOT_FIELDS: &[&str] = &[
    POINTS_FIELD,
    POINT_BATCHES_FIELD,
    COMPLETED_TASKS_FIELD,
    HISTORY_FIELD,
    VOUCHERS_FIELD,
    SCHEMA_VERSION_FIELD,
];

/// Ledger fields a mutation can rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerField {
    CompletedTasks,
    PointBatches,
    History,
    Vouchers,
}

impl LedgerField {
    pub fn key(&self) -> &'static str {
        match self {
            LedgerField::CompletedTasks => COMPLETED_TASKS_FIELD,
            LedgerField::PointBatches => POINT_BATCHES_FIELD,
            LedgerField::History => HISTORY_FIELD,
            LedgerField::Vouchers => VOUCHERS_FIELD,
        }
    }
}

/// Stored schema version; legacy records carry none.
pub fn schema_version(fields: &FieldMap) -> u32 {
    fields
        .get(SCHEMA_VERSION_FIELD)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Decode raw metafields into a typed snapshot, migrating legacy shapes.
///
/// Tolerant: unreadable fields and entries are dropped with a warning. Use
/// [`decode_snapshot_for_write`] when the result will be written back.
pub fn decode_snapshot(customer: &CustomerId, fields: &FieldMap) -> CustomerLedgerSnapshot {
    Decoder::new(customer).snapshot(fields)
}

/// Decode a snapshot that a mutation will rewrite.
///
/// Fails with [`StoreError::Malformed`] when batches or vouchers held data
/// that did not decode, so a write can never erase points or issued codes.
/// `completed_tasks` and history keep the repair-on-write behaviour.
pub fn decode_snapshot_for_write(
    customer: &CustomerId,
    fields: &FieldMap,
) -> Result<CustomerLedgerSnapshot, StoreError> {
    let mut decoder = Decoder::new(customer);
    let snapshot = decoder.snapshot(fields);
    let lossy: Vec<&str> = decoder
        .lossy
        .iter()
        .copied()
        .filter(|field| VALUE_FIELDS.contains(field))
        .collect();
    if lossy.is_empty() {
        return Ok(snapshot);
    }
    error!(customer_id = %customer, fields = ?lossy, "Refusing to rewrite unreadable ledger fields");
    Err(StoreError::Malformed(format!(
        "unreadable {} for customer {}",
        lossy.join(", "),
        customer
    )))
}

/// Serialize the requested fields plus the denormalized balance and version.
pub fn encode_fields(
    snapshot: &CustomerLedgerSnapshot,
    balance: u64,
    fields: &[LedgerField],
) -> Result<Vec<FieldWrite>, serde_json::Error> {
    let mut writes = Vec::with_capacity(fields.len() + 2);
    for field in fields {
        let value = match field {
            LedgerField::CompletedTasks => serde_json::to_string(&snapshot.completed_tasks)?,
            LedgerField::PointBatches => serde_json::to_string(&snapshot.point_batches)?,
            LedgerField::History => serde_json::to_string(&snapshot.history)?,
            LedgerField::Vouchers => serde_json::to_string(&snapshot.vouchers)?,
        };
        writes.push(FieldWrite::new(field.key(), value, FieldKind::Json));
    }
    writes.push(FieldWrite::new(
        POINTS_FIELD,
        balance.to_string(),
        FieldKind::Integer,
    ));
    writes.push(FieldWrite::new(
        SCHEMA_VERSION_FIELD,
        CURRENT_SCHEMA_VERSION.to_string(),
        FieldKind::Integer,
    ));
    Ok(writes)
}

/// Fields whose entries carry value and must not be dropped by a write.
const VALUE_FIELDS: &[&str] = &[POINT_BATCHES_FIELD, VOUCHERS_FIELD];

struct RawFields {
    completed_tasks: Option<Value>,
    point_batches: Option<Value>,
    history: Option<Value>,
    vouchers: Option<Value>,
}

/// Decodes fields for one customer, remembering which lost data.
struct Decoder<'a> {
    customer: &'a CustomerId,
    lossy: Vec<&'static str>,
}

impl<'a> Decoder<'a> {
    fn new(customer: &'a CustomerId) -> Self {
        Self {
            customer,
            lossy: Vec::new(),
        }
    }

    fn snapshot(&mut self, fields: &FieldMap) -> CustomerLedgerSnapshot {
        let version = schema_version(fields);
        if version > CURRENT_SCHEMA_VERSION {
            warn!(
                customer_id = %self.customer,
                version,
                "Ledger record written by a newer schema, decoding best-effort"
            );
        }

        let mut raw = RawFields {
            completed_tasks: self.parse_json(fields, COMPLETED_TASKS_FIELD),
            point_batches: self.parse_json(fields, POINT_BATCHES_FIELD),
            history: self.parse_json(fields, HISTORY_FIELD),
            vouchers: self.parse_json(fields, VOUCHERS_FIELD),
        };
        if version < CURRENT_SCHEMA_VERSION {
            raw = migrate_v0(self.customer, raw);
        }

        CustomerLedgerSnapshot {
            completed_tasks: self.task_map(raw.completed_tasks),
            point_batches: self.list(POINT_BATCHES_FIELD, raw.point_batches),
            history: self.list(HISTORY_FIELD, raw.history),
            vouchers: self.list(VOUCHERS_FIELD, raw.vouchers),
        }
    }

    fn parse_json(&mut self, fields: &FieldMap, key: &'static str) -> Option<Value> {
        let raw = fields.get(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(customer_id = %self.customer, field = key, error = %e, "Unreadable JSON field, using default");
                self.lossy.push(key);
                None
            }
        }
    }

    fn task_map(&mut self, value: Option<Value>) -> BTreeMap<String, CompletedTaskRecord> {
        let customer = self.customer;
        match value {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(task_id, record)| {
                    match serde_json::from_value::<CompletedTaskRecord>(record) {
                        Ok(record) => Some((task_id, record)),
                        Err(e) => {
                            warn!(customer_id = %customer, task_id = %task_id, error = %e, "Dropping unreadable task record");
                            None
                        }
                    }
                })
                .collect(),
            Some(other) => {
                warn!(
                    customer_id = %customer,
                    shape = value_kind(&other),
                    "completed_tasks has unexpected shape, treating as empty"
                );
                self.lossy.push(COMPLETED_TASKS_FIELD);
                BTreeMap::new()
            }
        }
    }

    fn list<T: DeserializeOwned>(&mut self, field: &'static str, value: Option<Value>) -> Vec<T> {
        let customer = self.customer;
        match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let total = items.len();
                let decoded: Vec<T> = items
                    .into_iter()
                    .filter_map(|item| match serde_json::from_value::<T>(item) {
                        Ok(decoded) => Some(decoded),
                        Err(e) => {
                            warn!(customer_id = %customer, field, error = %e, "Dropping unreadable entry");
                            None
                        }
                    })
                    .collect();
                if decoded.len() < total {
                    self.lossy.push(field);
                }
                decoded
            }
            Some(other) => {
                warn!(
                    customer_id = %customer,
                    field,
                    shape = value_kind(&other),
                    "Expected a list, treating as empty"
                );
                self.lossy.push(field);
                Vec::new()
            }
        }
    }
}

/// Legacy records stored `completed_tasks` as a list of ids with no dates.
/// Those cannot back a daily-limit check, so they start over empty.
fn migrate_v0(customer: &CustomerId, mut raw: RawFields) -> RawFields {
    if let Some(Value::Array(_)) = raw.completed_tasks {
        warn!(
            customer_id = %customer,
            "completed_tasks stored as a list (legacy), treating as empty"
        );
        raw.completed_tasks = None;
    }
    raw
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Batches alone, for balance reads that do not need the full snapshot.
pub fn decode_batches(customer: &CustomerId, fields: &FieldMap) -> Vec<PointBatch> {
    let mut decoder = Decoder::new(customer);
    let raw = decoder.parse_json(fields, POINT_BATCHES_FIELD);
    decoder.list(POINT_BATCHES_FIELD, raw)
}
