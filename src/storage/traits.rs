use async_trait::async_trait;
use crate::entity::{Entity, EntityId, EntityKey};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind}:{id} not found")]
    NotFound { kind: String, id: EntityId },
    #[error("{kind}:{id} already exists")]
    Conflict { kind: String, id: EntityId },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A staged write, applied when its unit of work commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert a new row; conflicts if the key exists
    Insert(Entity),
    /// Replace an existing row; fails if the key is missing
    Update(Entity),
    /// Delete an existing row; fails if the key is missing
    Delete { kind: String, id: EntityId },
}

impl Write {
    #[must_use]
    pub fn key(&self) -> EntityKey {
        match self {
            Write::Insert(entity) | Write::Update(entity) => entity.key(),
            Write::Delete { kind, id } => EntityKey::new(kind.clone(), *id),
        }
    }
}

/// The primary relational store. Always the source of truth.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Batch lookup by primary key.
    ///
    /// Rows come back in the store's own order, not the order of `ids`.
    /// Ids with no row are skipped.
    async fn get_many(&self, kind: &str, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError>;

    /// Enumerate rows of a type in primary-key order (paginated).
    /// Returns empty vec when offset exceeds total count.
    async fn scan(&self, kind: &str, offset: u64, limit: usize) -> Result<Vec<Entity>, StoreError>;

    /// Up to `limit` rows with a primary key above `after`, in key order.
    ///
    /// Keyset paging: rows deleted between calls cannot shift later rows
    /// out of the next batch the way an offset would.
    async fn scan_after(
        &self,
        kind: &str,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Count rows of a type.
    async fn count(&self, kind: &str) -> Result<u64, StoreError>;

    /// Apply all writes atomically: every write lands or none does.
    async fn commit(&self, writes: &[Write]) -> Result<(), StoreError>;

    /// Point lookup. Default implementation goes through `get_many`.
    async fn get(&self, kind: &str, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.get_many(kind, &[id]).await?.into_iter().next())
    }
}
