//! Task catalog.
//!
//! Static table of earnable tasks. Qualifying conditions are described by a
//! [`CompletionPredicate`]; the ledger only checks them in
//! [`crate::ledger::PointsLedger::submit_task`] and otherwise records whatever
//! metadata the caller supplies.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task id credited by the order-paid trigger.
pub const COMPLETE_ORDER_TASK: &str = "complete_order";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read task catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse task catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Invalid task {id}: {reason}")]
    InvalidTask { id: String, reason: String },
}

/// How often a task may be credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// At most once per store-local calendar day.
    Daily,
    /// At most once ever.
    Once,
    Unlimited,
}

/// Quantity a qualifying condition is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Minutes,
    Pages,
    Books,
    Orders,
}

impl Metric {
    /// Metadata key carrying the measured quantity.
    pub fn metadata_key(&self) -> &'static str {
        match self {
            Metric::Minutes => "minutes",
            Metric::Pages => "pages",
            Metric::Books => "bookCount",
            Metric::Orders => "orders",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Minutes => "minutes",
            Metric::Pages => "pages",
            Metric::Books => "books",
            Metric::Orders => "orders",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionPredicate {
    #[default]
    Always,
    AtLeast { metric: Metric, minimum: u64 },
}

/// Result of checking a predicate against submitted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualification {
    Qualified,
    Short { missing: u64, unit: &'static str },
}

impl CompletionPredicate {
    /// Missing or non-numeric quantities count as zero.
    pub fn evaluate(&self, metadata: &Value) -> Qualification {
        match self {
            CompletionPredicate::Always => Qualification::Qualified,
            CompletionPredicate::AtLeast { metric, minimum } => {
                let have = metadata
                    .get(metric.metadata_key())
                    .and_then(|v| match v {
                        Value::Number(n) => n.as_u64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    })
                    .unwrap_or(0);
                if have >= *minimum {
                    Qualification::Qualified
                } else {
                    Qualification::Short {
                        missing: minimum - have,
                        unit: metric.unit(),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub display_name: String,
    pub points: u64,
    pub cadence: Cadence,
    #[serde(default)]
    pub predicate: CompletionPredicate,
    #[serde(default)]
    pub description: String,
}

impl Task {
    /// Provenance tag stamped on batches earned by this task.
    pub fn batch_source(&self) -> String {
        format!("task_{}", self.id)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    /// Validate and build a catalog.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, CatalogError> {
        for (i, task) in tasks.iter().enumerate() {
            if task.id.trim().is_empty() {
                return Err(CatalogError::InvalidTask {
                    id: task.id.clone(),
                    reason: "empty id".to_string(),
                });
            }
            if task.points == 0 {
                return Err(CatalogError::InvalidTask {
                    id: task.id.clone(),
                    reason: "task must award points".to_string(),
                });
            }
            if tasks[..i].iter().any(|t| t.id == task.id) {
                return Err(CatalogError::DuplicateTask(task.id.clone()));
            }
        }
        Ok(Self { tasks })
    }

    /// Parse a YAML document of the form `tasks: [ {id, display_name, ...} ]`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_tasks(file.tasks)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

impl Default for TaskCatalog {
    /// The built-in storefront tasks.
    fn default() -> Self {
        let task = |id: &str, name: &str, points, predicate, description: &str| Task {
            id: id.to_string(),
            display_name: name.to_string(),
            points,
            cadence: Cadence::Daily,
            predicate,
            description: description.to_string(),
        };
        let at_least = |metric, minimum| CompletionPredicate::AtLeast { metric, minimum };

        Self {
            tasks: vec![
                task(
                    "login",
                    "Daily login",
                    10,
                    CompletionPredicate::Always,
                    "Sign in to your account every day",
                ),
                task(
                    "browse_time",
                    "Browse the shelves",
                    10,
                    at_least(Metric::Minutes, 2),
                    "Browse books for 2 minutes",
                ),
                task(
                    "read_pages",
                    "Read a sample",
                    30,
                    at_least(Metric::Pages, 10),
                    "Read 10 sample pages",
                ),
                task(
                    "collect_books",
                    "Book hunt",
                    20,
                    at_least(Metric::Books, 2),
                    "Add 2 books to your wishlist",
                ),
                task(
                    COMPLETE_ORDER_TASK,
                    "Complete an order",
                    100,
                    at_least(Metric::Orders, 1),
                    "Complete an order",
                ),
                task(
                    "play_game",
                    "Play the mini game",
                    20,
                    CompletionPredicate::Always,
                    "Play the mini game",
                ),
            ],
        }
    }
}
