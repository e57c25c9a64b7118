use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{
    merge_json, validate_filters, Filter, RecordStore, StoreError, StoredDocument, WriteBatch,
    WriteOp,
};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// SQLite-backed record store. Documents live as JSON text in a single
/// `records` table; a batch commit is one SQL transaction.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and run migrations when asked.
    pub async fn new(database_url: &str, auto_migrate: bool) -> Result<Self, StoreError> {
        if !Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn read(
        conn: &mut SqliteConnection,
        collection: &str,
        id: &str,
    ) -> Result<Option<(u64, Value)>, StoreError> {
        let row = sqlx::query("SELECT version, data FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version")?;
                let data: String = row.try_get("data")?;
                Ok(Some((version as u64, serde_json::from_str(&data)?)))
            }
            None => Ok(None),
        }
    }

    async fn write(
        conn: &mut SqliteConnection,
        collection: &str,
        id: &str,
        version: u64,
        data: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO records (collection, id, version, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(version as i64)
        .bind(serde_json::to_string(data)?)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn apply(conn: &mut SqliteConnection, op: &WriteOp) -> Result<(), StoreError> {
        let key = op.key();
        match op {
            WriteOp::Set { data, .. } => {
                let current = Self::read(conn, &key.collection, &key.id).await?;
                let version = current.map(|(v, _)| v + 1).unwrap_or(1);
                Self::write(conn, &key.collection, &key.id, version, data).await
            }
            WriteOp::Merge { patch, .. } => {
                let (version, mut data) = Self::read(conn, &key.collection, &key.id)
                    .await?
                    .map(|(v, data)| (v + 1, data))
                    .unwrap_or((1, Value::Object(Map::new())));
                merge_json(&mut data, patch);
                Self::write(conn, &key.collection, &key.id, version, &data).await
            }
            WriteOp::Delete { .. } => {
                sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
                    .bind(&key.collection)
                    .bind(&key.id)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::read(&mut conn, collection, id)
            .await?
            .map(|(version, data)| StoredDocument {
                id: id.to_string(),
                version,
                data,
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

        // Filters run in process; collections here are small ERP tables.
        let rows = sqlx::query("SELECT id, version, data FROM records WHERE collection = ?1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut documents = Vec::new();
        for row in rows {
            let data: String = row.try_get("data")?;
            let data: Value = serde_json::from_str(&data)?;
            if filters.iter().all(|f| f.matches(&data)) {
                let version: i64 = row.try_get("version")?;
                documents.push(StoredDocument {
                    id: row.try_get("id")?,
                    version: version as u64,
                    data,
                });
            }
        }
        Ok(documents)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for (key, precondition) in &batch.preconditions {
            let current = Self::read(&mut tx, &key.collection, &key.id)
                .await?
                .map(|(version, _)| version);
            if !precondition.holds(current) {
                debug!(
                    collection = %key.collection,
                    id = %key.id,
                    ?precondition,
                    "Precondition failed, rolling back"
                );
                tx.rollback().await?;
                return Err(StoreError::Conflict {
                    collection: key.collection.clone(),
                    id: key.id.clone(),
                });
            }
        }

        for op in &batch.ops {
            Self::apply(&mut tx, op).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Precondition;
    use serde_json::json;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("erp-flow.db").display());
        let store = SqliteStore::new(&url, true).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_sqlite_merge_and_version() {
        let (_dir, store) = temp_store().await;
        store.set("projects", "p1", json!({"name": "Gate"})).await.unwrap();
        store.merge("projects", "p1", json!({"status": "pending"})).await.unwrap();

        let doc = store.get("projects", "p1").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.data, json!({"name": "Gate", "status": "pending"}));
    }

    #[tokio::test]
    async fn test_sqlite_conflict_rolls_back() {
        let (_dir, store) = temp_store().await;
        store.set("inventory", "i1", json!({"stockQuantity": 5})).await.unwrap();

        let batch = WriteBatch::new()
            .require("inventory", "i1", Precondition::Version(9))
            .merge("inventory", "i1", json!({"stockQuantity": 0}));
        assert!(store.commit(batch).await.unwrap_err().is_conflict());

        let doc = store.get("inventory", "i1").await.unwrap().unwrap();
        assert_eq!(doc.data["stockQuantity"], 5);
    }
}
