use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    merge_json, validate_filters, Filter, RecordStore, StoreError, StoredDocument, WriteBatch,
    WriteOp,
};

type Collection = BTreeMap<String, (u64, Value)>;

/// In-process record store. Every commit holds the write lock for its whole
/// precondition check + apply, which is what makes a batch atomic here.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fixture shaped `{collection: {id: document}}`.
    pub fn from_fixture(fixture: &Value) -> Result<Self, StoreError> {
        let root = fixture.as_object().ok_or_else(|| {
            StoreError::InvalidQuery("fixture must be an object of collections".to_string())
        })?;

        let mut collections = HashMap::new();
        for (name, documents) in root {
            let documents = documents.as_object().ok_or_else(|| {
                StoreError::InvalidQuery(format!("fixture collection '{name}' must be an object"))
            })?;
            let collection: Collection = documents
                .iter()
                .map(|(id, data)| (id.clone(), (1, data.clone())))
                .collect();
            collections.insert(name.clone(), collection);
        }

        Ok(Self {
            collections: RwLock::new(collections),
        })
    }

    /// Snapshot the whole store in fixture form.
    pub async fn dump(&self) -> Value {
        let collections = self.collections.read().await;
        let mut root = Map::new();
        for (name, documents) in collections.iter() {
            let docs: Map<String, Value> = documents
                .iter()
                .map(|(id, (_, data))| (id.clone(), data.clone()))
                .collect();
            root.insert(name.clone(), Value::Object(docs));
        }
        Value::Object(root)
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn apply(collections: &mut HashMap<String, Collection>, op: &WriteOp) {
        let key = op.key();
        let collection = collections.entry(key.collection.clone()).or_default();
        match op {
            WriteOp::Set { data, .. } => {
                let version = collection.get(&key.id).map(|(v, _)| v + 1).unwrap_or(1);
                collection.insert(key.id.clone(), (version, data.clone()));
            }
            WriteOp::Merge { patch, .. } => {
                let (version, mut data) = collection
                    .remove(&key.id)
                    .map(|(v, data)| (v + 1, data))
                    .unwrap_or((1, Value::Object(Map::new())));
                merge_json(&mut data, patch);
                collection.insert(key.id.clone(), (version, data));
            }
            WriteOp::Delete { .. } => {
                collection.remove(&key.id);
            }
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(version, data)| StoredDocument {
                id: id.to_string(),
                version: *version,
                data: data.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().set(collection, id, data)).await
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().merge(collection, id, patch)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().delete(collection, id)).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, StoreError> {
        validate_filters(filters)?;
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(documents
            .iter()
            .filter(|(_, (_, data))| filters.iter().all(|f| f.matches(data)))
            .map(|(id, (version, data))| StoredDocument {
                id: id.clone(),
                version: *version,
                data: data.clone(),
            })
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;

        for (key, precondition) in &batch.preconditions {
            let current = collections
                .get(&key.collection)
                .and_then(|docs| docs.get(&key.id))
                .map(|(version, _)| *version);
            if !precondition.holds(current) {
                debug!(
                    collection = %key.collection,
                    id = %key.id,
                    ?precondition,
                    ?current,
                    "Precondition failed, rejecting batch"
                );
                return Err(StoreError::Conflict {
                    collection: key.collection.clone(),
                    id: key.id.clone(),
                });
            }
        }

        for op in &batch.ops {
            Self::apply(&mut collections, op);
        }
        Ok(())
    }
}
