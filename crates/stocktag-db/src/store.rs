//! # Local Store
//!
//! Offline-first record store: named collections of JSON records in one
//! SQLite file.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert / upsert / delete / clear                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Resolve schema ──── unknown ──► UnknownCollection                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Validate every record ── bad ──► SchemaViolation (nothing written)     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Take write lock ──► BEGIN ──► apply ──► COMMIT ──► release lock        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers never interleave, and a failed write rolls back as a whole when
//! the transaction is dropped. Reads go straight to the pool; WAL lets them
//! run alongside a write and see the last committed state.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::schema::{default_schemas, CollectionSchema};

/// Counts reported by [`LocalStore::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Records with no previous match.
    pub inserted: usize,
    /// Records that replaced an existing one.
    pub replaced: usize,
    /// Older duplicates removed while replacing.
    pub collapsed: usize,
}

/// Collection store shared by every duty (wrap in `Arc`).
#[derive(Debug)]
pub struct LocalStore {
    db: Database,
    schemas: HashMap<String, CollectionSchema>,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Opens the store with the `products` and `inventory` collections.
    pub fn new(db: Database) -> Self {
        Self::with_schemas(db, default_schemas())
    }

    /// Opens the store with an explicit set of collections.
    pub fn with_schemas(db: Database, schemas: Vec<CollectionSchema>) -> Self {
        LocalStore {
            db,
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.name.clone(), schema))
                .collect(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the declared schema of `collection`.
    pub fn schema(&self, collection: &str) -> DbResult<&CollectionSchema> {
        self.schemas
            .get(collection)
            .ok_or_else(|| DbError::UnknownCollection(collection.to_string()))
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validates `record` and appends it, even if a record with the same
    /// identity already exists.
    pub async fn insert(&self, collection: &str, record: &Value) -> DbResult<()> {
        self.schema(collection)?.validate(record)?;
        let body = serde_json::to_string(record)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;
        insert_row(&mut tx, collection, &body).await?;
        tx.commit().await?;

        debug!(collection, "Record inserted");
        Ok(())
    }

    /// Replaces, per record, every stored record sharing its
    /// `identity_field` value with that record, or inserts it.
    ///
    /// The first matching record keeps its position; later duplicates are
    /// removed. All records are validated before anything is written.
    pub async fn upsert(
        &self,
        collection: &str,
        records: &[Value],
        identity_field: &str,
    ) -> DbResult<UpsertOutcome> {
        let schema = self.schema(collection)?;
        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            let object = schema.validate(record)?;
            let key = object
                .get(identity_field)
                .filter(|v| !v.is_null())
                .ok_or_else(|| DbError::schema_violation(collection, identity_field))?;
            prepared.push((key, record, serde_json::to_string(record)?));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;
        let mut existing = load_rows(&mut tx, collection).await?;
        let mut outcome = UpsertOutcome::default();

        for (key, record, body) in prepared {
            let matches: Vec<usize> = existing
                .iter()
                .enumerate()
                .filter(|(_, (_, stored))| stored.get(identity_field) == Some(key))
                .map(|(index, _)| index)
                .collect();

            match matches.split_first() {
                Some((&keep, duplicates)) => {
                    sqlx::query(
                        "UPDATE records SET body = ?, \
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE seq = ?",
                    )
                    .bind(&body)
                    .bind(existing[keep].0)
                    .execute(&mut *tx)
                    .await?;
                    existing[keep].1 = record.clone();

                    for &index in duplicates.iter().rev() {
                        sqlx::query("DELETE FROM records WHERE seq = ?")
                            .bind(existing[index].0)
                            .execute(&mut *tx)
                            .await?;
                        existing.remove(index);
                    }

                    outcome.replaced += 1;
                    outcome.collapsed += duplicates.len();
                }
                None => {
                    let seq = insert_row(&mut tx, collection, &body).await?;
                    existing.push((seq, record.clone()));
                    outcome.inserted += 1;
                }
            }
        }

        tx.commit().await?;

        debug!(
            collection,
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            collapsed = outcome.collapsed,
            "Records upserted"
        );
        Ok(outcome)
    }

    /// Removes every record whose `field` equals `value`. Returns the count.
    pub async fn delete(&self, collection: &str, field: &str, value: &Value) -> DbResult<usize> {
        self.schema(collection)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await?;
        let doomed: Vec<i64> = load_rows(&mut tx, collection)
            .await?
            .into_iter()
            .filter(|(_, stored)| stored.get(field) == Some(value))
            .map(|(seq, _)| seq)
            .collect();

        for seq in &doomed {
            sqlx::query("DELETE FROM records WHERE seq = ?")
                .bind(seq)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(collection, field, removed = doomed.len(), "Records deleted");
        Ok(doomed.len())
    }

    /// Removes every record of `collection`. Returns the count.
    pub async fn clear(&self, collection: &str) -> DbResult<u64> {
        self.schema(collection)?;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(self.db.pool())
            .await?;

        debug!(collection, removed = result.rows_affected(), "Collection cleared");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns every record of `collection` in insertion order.
    pub async fn read_all(&self, collection: &str) -> DbResult<Vec<Value>> {
        self.schema(collection)?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM records WHERE collection = ? ORDER BY seq")
                .bind(collection)
                .fetch_all(self.db.pool())
                .await?;

        rows.into_iter()
            .map(|(body,)| Ok(serde_json::from_str(&body)?))
            .collect()
    }

    /// Returns the records of `collection` that decode as `T`, skipping the
    /// rest with a warning.
    pub async fn read_as<T: DeserializeOwned>(&self, collection: &str) -> DbResult<Vec<T>> {
        let records = self.read_all(collection).await?;
        let total = records.len();

        let decoded: Vec<T> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(collection, error = %e, "Skipping record that does not decode");
                    None
                }
            })
            .collect();

        if decoded.len() < total {
            warn!(
                collection,
                skipped = total - decoded.len(),
                "Some stored records were skipped"
            );
        }
        Ok(decoded)
    }

    /// Returns the records of `collection` whose `field` equals `value`.
    pub async fn search(&self, collection: &str, field: &str, value: &Value) -> DbResult<Vec<Value>> {
        Ok(self
            .read_all(collection)
            .await?
            .into_iter()
            .filter(|record| record.get(field) == Some(value))
            .collect())
    }

    /// Number of records in `collection`.
    pub async fn count(&self, collection: &str) -> DbResult<i64> {
        self.schema(collection)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Checks if the backing database answers queries.
    pub async fn health_check(&self) -> bool {
        self.db.health_check().await
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    body: &str,
) -> DbResult<i64> {
    let result = sqlx::query("INSERT INTO records (collection, body) VALUES (?, ?)")
        .bind(collection)
        .bind(body)
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn load_rows(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
) -> DbResult<Vec<(i64, Value)>> {
    let rows: Vec<(i64, String)> =
        sqlx::query_as("SELECT seq, body FROM records WHERE collection = ? ORDER BY seq")
            .bind(collection)
            .fetch_all(&mut **tx)
            .await?;

    rows.into_iter()
        .map(|(seq, body)| Ok((seq, serde_json::from_str(&body)?)))
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use crate::schema::{ID_FIELD, INVENTORY, PRODUCTS};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    async fn memory_store() -> LocalStore {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        LocalStore::new(db)
    }

    fn product(id: &str, name: &str, quantity: i64) -> Value {
        json!({
            "id": id,
            "name": name,
            "price": 1.25,
            "quantity": quantity,
            "timestamp": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_insert_keeps_order() {
        let store = memory_store().await;
        for id in ["P-1", "P-2", "P-3"] {
            store.insert(PRODUCTS, &product(id, id, 1)).await.unwrap();
        }

        let ids: Vec<String> = store
            .read_all(PRODUCTS)
            .await
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["P-1", "P-2", "P-3"]);
    }

    #[tokio::test]
    async fn test_schema_violation_leaves_collection_untouched() {
        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "Widget", 1)).await.unwrap();

        let err = store
            .insert(PRODUCTS, &json!({ "id": "P-2", "name": "No price" }))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { ref field, .. } if field == "price"));

        // One bad record in a batch rejects the whole batch.
        let batch = [product("P-3", "Ok", 1), json!("not an object")];
        let err = store.upsert(PRODUCTS, &batch, ID_FIELD).await.unwrap_err();
        assert!(err.is_schema_violation());

        assert_eq!(store.count(PRODUCTS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = memory_store().await;
        assert!(matches!(
            store.read_all("customers").await,
            Err(DbError::UnknownCollection(name)) if name == "customers"
        ));
        assert!(store.insert("customers", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_in_full() {
        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "Old", 1)).await.unwrap();

        let mut replacement = product("P-1", "New", 9);
        replacement["extra"] = json!(true);
        store
            .upsert(PRODUCTS, &[replacement.clone()], ID_FIELD)
            .await
            .unwrap();
        store
            .upsert(PRODUCTS, &[replacement.clone()], ID_FIELD)
            .await
            .unwrap();

        let found = store.search(PRODUCTS, "id", &json!("P-1")).await.unwrap();
        assert_eq!(found, vec![replacement]);
    }

    #[tokio::test]
    async fn test_upsert_collapses_duplicates() {
        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "A", 1)).await.unwrap();
        store.insert(PRODUCTS, &product("P-2", "B", 1)).await.unwrap();
        store.insert(PRODUCTS, &product("P-1", "C", 1)).await.unwrap();

        let outcome = store
            .upsert(PRODUCTS, &[product("P-1", "D", 4)], ID_FIELD)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome {
                inserted: 0,
                replaced: 1,
                collapsed: 1
            }
        );

        let all = store.read_all(PRODUCTS).await.unwrap();
        assert_eq!(all.len(), 2);
        // Replacement keeps the first occurrence's position.
        assert_eq!(all[0]["name"], "D");
        assert_eq!(all[1]["id"], "P-2");
    }

    #[tokio::test]
    async fn test_upsert_mixed_batch_grows_by_new_records() {
        let store = memory_store().await;
        store
            .upsert(
                PRODUCTS,
                &[product("P-1", "A", 1), product("P-2", "B", 1)],
                ID_FIELD,
            )
            .await
            .unwrap();

        let outcome = store
            .upsert(
                PRODUCTS,
                &[product("P-2", "B2", 5), product("P-3", "C", 1)],
                ID_FIELD,
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.replaced, 1);
        assert_eq!(store.count(PRODUCTS).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_upsert_requires_identity() {
        let store = memory_store().await;
        let err = store
            .upsert(PRODUCTS, &[product("P-1", "A", 1)], "sku")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaViolation { ref field, .. } if field == "sku"));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "A", 1)).await.unwrap();
        store.insert(PRODUCTS, &product("P-2", "B", 1)).await.unwrap();
        store.insert(PRODUCTS, &product("P-1", "C", 1)).await.unwrap();

        assert_eq!(store.delete(PRODUCTS, "id", &json!("P-1")).await.unwrap(), 2);
        assert_eq!(store.count(PRODUCTS).await.unwrap(), 1);
        assert_eq!(store.delete(PRODUCTS, "id", &json!("P-9")).await.unwrap(), 0);

        assert_eq!(store.clear(PRODUCTS).await.unwrap(), 1);
        assert!(store.read_all(PRODUCTS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "A", 1)).await.unwrap();
        store
            .insert(
                INVENTORY,
                &json!({
                    "id": "I-1", "productId": "P-1", "quantity": 2,
                    "timestamp": "2024-05-01T10:00:00Z", "action": "in"
                }),
            )
            .await
            .unwrap();

        store.clear(PRODUCTS).await.unwrap();
        assert_eq!(store.count(INVENTORY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_as_skips_undecodable() {
        #[derive(Deserialize)]
        struct Priced {
            price: f64,
        }

        let store = memory_store().await;
        store.insert(PRODUCTS, &product("P-1", "A", 1)).await.unwrap();
        let mut odd = product("P-2", "B", 1);
        odd["price"] = json!("free");
        store.insert(PRODUCTS, &odd).await.unwrap();

        let priced: Vec<Priced> = store.read_as(PRODUCTS).await.unwrap();
        assert_eq!(priced.len(), 1);
        assert_eq!(priced[0].price, 1.25);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("store.db")))
            .await
            .unwrap();
        let store = Arc::new(LocalStore::new(db));

        let mut tasks = Vec::new();
        for n in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("P-{}", n % 5);
                store
                    .upsert(PRODUCTS, &[product(&id, "x", n)], ID_FIELD)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.count(PRODUCTS).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            let store = LocalStore::new(db);
            store.insert(PRODUCTS, &product("P-1", "A", 1)).await.unwrap();
            store.database().close().await;
        }

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let store = LocalStore::new(db);
        assert_eq!(store.count(PRODUCTS).await.unwrap(), 1);
        assert!(store.health_check().await);
    }
}
