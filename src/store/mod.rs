//! Record store abstraction
//!
//! The document database that holds projects, users, inventory and the
//! derived task index. Components receive an `Arc<dyn RecordStore>` instead
//! of reaching for a global handle, so tests can run against [`MemoryStore`]
//! and production against whichever backend the binary wires up.
//!
//! Multi-document atomicity is expressed as a [`WriteBatch`]: a set of
//! preconditions observed during a read phase plus the writes derived from
//! them. A backend applies the whole batch or nothing and reports
//! [`StoreError::Conflict`] when any precondition no longer holds; callers
//! re-read and re-stage.

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Maximum number of values accepted by a single `In` filter.
pub const IN_QUERY_LIMIT: usize = 30;

pub mod collections {
    pub const PROJECTS: &str = "projects";
    pub const USERS: &str = "users";
    pub const INVENTORY: &str = "inventory";
    pub const INVENTORY_CODES: &str = "inventory_codes";
    pub const INVENTORY_TRANSACTIONS: &str = "inventory_transactions";
    pub const TASKS: &str = "tasks";
    pub const QUOTATIONS: &str = "quotations";
    pub const WORKFLOW_EVENTS: &str = "workflow_events";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Write conflict on {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A document as read from the store, with the version used for
/// optimistic concurrency.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq(path, expected) => field(data, path) == Some(expected),
            Filter::In(path, candidates) => field(data, path)
                .map(|actual| candidates.contains(actual))
                .unwrap_or(false),
        }
    }
}

/// Reject filters a document database would refuse.
pub fn validate_filters(filters: &[Filter]) -> Result<(), StoreError> {
    for filter in filters {
        if let Filter::In(path, values) = filter {
            if values.is_empty() {
                return Err(StoreError::InvalidQuery(format!(
                    "'in' filter on '{path}' needs at least one value"
                )));
            }
            if values.len() > IN_QUERY_LIMIT {
                return Err(StoreError::InvalidQuery(format!(
                    "'in' filter on '{path}' has {} values (limit {IN_QUERY_LIMIT})",
                    values.len()
                )));
            }
        }
    }
    Ok(())
}

/// Resolve a dotted field path (`tasks.assembly.status`) inside a document.
pub fn field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}

/// Deep-merge `patch` into `target`. Objects merge key by key; every other
/// value (arrays included) replaces what was there.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                let nested = value.is_object() && target_map.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target_map.get_mut(key) {
                        merge_json(existing, value);
                    }
                } else {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Missing,
    Exists,
    Version(u64),
}

impl Precondition {
    /// `current` is the version of the document now, `None` if absent.
    pub fn holds(&self, current: Option<u64>) -> bool {
        match self {
            Precondition::Missing => current.is_none(),
            Precondition::Exists => current.is_some(),
            Precondition::Version(expected) => current == Some(*expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { key: DocKey, data: Value },
    Merge { key: DocKey, patch: Value },
    Delete { key: DocKey },
}

impl WriteOp {
    pub fn key(&self) -> &DocKey {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Merge { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Preconditions plus writes, applied as one atomic unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<(DocKey, Precondition)>,
    pub ops: Vec<WriteOp>,
}

fn key(collection: &str, id: &str) -> DocKey {
    DocKey {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, collection: &str, id: &str, precondition: Precondition) -> Self {
        self.preconditions.push((key(collection, id), precondition));
        self
    }

    pub fn set(mut self, collection: &str, id: &str, data: Value) -> Self {
        self.ops.push(WriteOp::Set {
            key: key(collection, id),
            data,
        });
        self
    }

    pub fn merge(mut self, collection: &str, id: &str, patch: Value) -> Self {
        self.ops.push(WriteOp::Merge {
            key: key(collection, id),
            patch,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.ops.push(WriteOp::Delete {
            key: key(collection, id),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Document store operations used by every component.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Overwrite (or create) a document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Deep-merge a patch into a document, creating it when missing.
    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// All documents matching every filter, ordered by id.
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, StoreError>;

    /// Apply a batch atomically or fail with [`StoreError::Conflict`].
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_nested_objects() {
        let mut target = json!({"tasks": {"assembly": {"status": "pending", "assignedTo": null}}, "name": "A"});
        merge_json(&mut target, &json!({"tasks": {"assembly": {"assignedTo": "u1"}, "painting": {"status": "pending"}}}));

        assert_eq!(target["tasks"]["assembly"]["status"], "pending");
        assert_eq!(target["tasks"]["assembly"]["assignedTo"], "u1");
        assert_eq!(target["tasks"]["painting"]["status"], "pending");
        assert_eq!(target["name"], "A");
    }

    #[test]
    fn test_merge_json_replaces_arrays() {
        let mut target = json!({"stages": [1, 2, 3]});
        merge_json(&mut target, &json!({"stages": [4]}));
        assert_eq!(target["stages"], json!([4]));
    }

    #[test]
    fn test_filter_dotted_path() {
        let doc = json!({"tasks": {"cutting": {"status": "completed"}}});
        assert!(Filter::eq("tasks.cutting.status", "completed").matches(&doc));
        assert!(!Filter::eq("tasks.painting.status", "completed").matches(&doc));
    }

    #[test]
    fn test_in_filter_limit() {
        let values: Vec<String> = (0..=IN_QUERY_LIMIT).map(|i| format!("role{i}")).collect();
        let result = validate_filters(&[Filter::any_of("role", values)]);
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));

        assert!(validate_filters(&[Filter::any_of("role", ["sales"])]).is_ok());
    }

    #[test]
    fn test_precondition_holds() {
        assert!(Precondition::Missing.holds(None));
        assert!(!Precondition::Missing.holds(Some(1)));
        assert!(Precondition::Exists.holds(Some(3)));
        assert!(Precondition::Version(2).holds(Some(2)));
        assert!(!Precondition::Version(2).holds(Some(3)));
    }
}
