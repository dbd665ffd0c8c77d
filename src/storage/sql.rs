// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL primary store.
//!
//! One table holds every entity type; columns are kept as a JSON document:
//!
//! ```sql
//! CREATE TABLE entities (
//!   kind VARCHAR(64) NOT NULL,
//!   id   BIGINT      NOT NULL,
//!   data TEXT        NOT NULL,   -- JSON object
//!   PRIMARY KEY (kind, id)
//! )
//! ```
//!
//! A unit of work commits as a single database transaction. Batch lookups
//! use `WHERE id IN (...)` with no `ORDER BY`, so rows come back in
//! whatever order the engine stores them.
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL `LONGTEXT` comes back through the `Any` driver as bytes, so text
//! columns are read as `String` first and `Vec<u8>` second.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::{AnyPoolOptions, AnyRow}};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

use crate::entity::{Entity, EntityId};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{PrimaryStore, StoreError, Write};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                kind VARCHAR(64) NOT NULL,
                id BIGINT NOT NULL,
                data LONGTEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#
        };

        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create entities table: {}", e)))?;
        Ok(())
    }

    fn row_to_entity(kind: &str, row: &AnyRow) -> Result<Entity, StoreError> {
        let id: i64 = row.try_get("id").map_err(backend)?;

        let data: String = row
            .try_get::<String, _>("data")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("data")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .ok_or_else(|| StoreError::Backend(format!("No data in row {}:{}", kind, id)))?;

        let data = serde_json::from_str(&data)
            .map_err(|e| StoreError::Backend(format!("Corrupt JSON in row {}:{}: {}", kind, id, e)))?;

        Ok(Entity::new(kind, id, data))
    }

    fn encode(entity: &Entity) -> Result<String, StoreError> {
        serde_json::to_string(&entity.data).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl PrimaryStore for SqlStore {
    async fn get_many(&self, kind: &str, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT id, data FROM entities WHERE kind = ? AND id IN ({})",
            placeholders.join(", ")
        );

        let rows = retry("sql_get_many", &RetryConfig::query(), || {
            let sql = sql.clone();
            async move {
                let mut query = sqlx::query(&sql).bind(kind);
                for id in ids {
                    query = query.bind(*id);
                }
                query.fetch_all(&self.pool).await.map_err(backend)
            }
        })
        .await?;

        rows.iter().map(|row| Self::row_to_entity(kind, row)).collect()
    }

    async fn scan(&self, kind: &str, offset: u64, limit: usize) -> Result<Vec<Entity>, StoreError> {
        let rows = retry("sql_scan", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, data FROM entities WHERE kind = ? ORDER BY id LIMIT ? OFFSET ?")
                .bind(kind)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(|row| Self::row_to_entity(kind, row)).collect()
    }

    async fn scan_after(
        &self,
        kind: &str,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError> {
        let after = after.unwrap_or(EntityId::MIN);
        let rows = retry("sql_scan_after", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, data FROM entities WHERE kind = ? AND id > ? ORDER BY id LIMIT ?")
                .bind(kind)
                .bind(after)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(|row| Self::row_to_entity(kind, row)).collect()
    }

    async fn count(&self, kind: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count as u64)
    }

    async fn commit(&self, writes: &[Write]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }

        // Dropping `tx` on any early return rolls the whole batch back
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for write in writes {
            let key = write.key();
            let exists = sqlx::query("SELECT 1 FROM entities WHERE kind = ? AND id = ? LIMIT 1")
                .bind(&key.kind)
                .bind(key.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .is_some();

            match write {
                Write::Insert(entity) => {
                    if exists {
                        return Err(StoreError::Conflict { kind: key.kind, id: key.id });
                    }
                    sqlx::query("INSERT INTO entities (kind, id, data) VALUES (?, ?, ?)")
                        .bind(&entity.kind)
                        .bind(entity.id)
                        .bind(Self::encode(entity)?)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                Write::Update(entity) => {
                    if !exists {
                        return Err(StoreError::NotFound { kind: key.kind, id: key.id });
                    }
                    sqlx::query("UPDATE entities SET data = ? WHERE kind = ? AND id = ?")
                        .bind(Self::encode(entity)?)
                        .bind(&entity.kind)
                        .bind(entity.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                Write::Delete { kind, id } => {
                    if !exists {
                        return Err(StoreError::NotFound { kind: key.kind, id: key.id });
                    }
                    sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
                        .bind(kind)
                        .bind(*id)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
            }
        }

        tx.commit().await.map_err(backend)?;
        debug!(writes = writes.len(), "SQL transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use serde_json::json;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("search_sync_{}_{}.db", name, uuid::Uuid::new_v4()))
    }

    /// Clean up SQLite database and its WAL files
    fn cleanup_db(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(format!("{}-wal", path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", path.display()));
    }

    async fn open(path: &PathBuf) -> SqlStore {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        SqlStore::new(&url).await.unwrap()
    }

    fn item(id: EntityId, title: &str) -> Entity {
        Entity::new("item", id, json!({"title": title, "price": 10}))
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let db_path = temp_db_path("commit");
        let store = open(&db_path).await;

        store.commit(&[Write::Insert(item(1, "Chair"))]).await.unwrap();

        let row = store.get("item", 1).await.unwrap().unwrap();
        assert_eq!(row.field("title"), Some(&json!("Chair")));
        assert_eq!(row.field("price"), Some(&json!(10)));

        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let db_path = temp_db_path("rollback");
        let store = open(&db_path).await;
        store.commit(&[Write::Insert(item(1, "a"))]).await.unwrap();

        let result = store
            .commit(&[
                Write::Insert(item(2, "b")),
                Write::Insert(item(1, "dup")),
            ])
            .await;

        assert_eq!(result, Err(StoreError::Conflict { kind: "item".into(), id: 1 }));
        assert_eq!(store.count("item").await.unwrap(), 1);
        assert!(store.get("item", 2).await.unwrap().is_none());

        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db_path = temp_db_path("update");
        let store = open(&db_path).await;
        store.commit(&[Write::Insert(item(1, "a")), Write::Insert(item(2, "b"))]).await.unwrap();

        store
            .commit(&[
                Write::Update(item(1, "a2")),
                Write::Delete { kind: "item".into(), id: 2 },
            ])
            .await
            .unwrap();

        let row = store.get("item", 1).await.unwrap().unwrap();
        assert_eq!(row.field("title"), Some(&json!("a2")));
        assert!(store.get("item", 2).await.unwrap().is_none());

        let missing = store.commit(&[Write::Update(item(9, "x"))]).await;
        assert_eq!(missing, Err(StoreError::NotFound { kind: "item".into(), id: 9 }));

        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_get_many_and_scan() {
        let db_path = temp_db_path("scan");
        let store = open(&db_path).await;
        let writes: Vec<Write> = (1..=5).map(|i| Write::Insert(item(i, "x"))).collect();
        store.commit(&writes).await.unwrap();

        let mut ids: Vec<EntityId> = store
            .get_many("item", &[4, 2, 42])
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![2, 4]);

        let page: Vec<EntityId> = store.scan("item", 3, 10).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(page, vec![4, 5]);
        let after: Vec<EntityId> = store.scan_after("item", Some(2), 2).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(after, vec![3, 4]);
        assert_eq!(store.scan_after("item", None, 10).await.unwrap().len(), 5);
        assert!(store.get_many("item", &[]).await.unwrap().is_empty());

        cleanup_db(&db_path);
    }

    #[tokio::test]
    async fn test_types_are_separate() {
        let db_path = temp_db_path("types");
        let store = open(&db_path).await;

        store
            .commit(&[
                Write::Insert(item(1, "item one")),
                Write::Insert(Entity::new("group", 1, json!({"name": "Tables"}))),
            ])
            .await
            .unwrap();

        assert_eq!(store.count("item").await.unwrap(), 1);
        assert_eq!(store.count("group").await.unwrap(), 1);
        let group = store.get("group", 1).await.unwrap().unwrap();
        assert_eq!(group.field("name"), Some(&json!("Tables")));

        cleanup_db(&db_path);
    }
}
