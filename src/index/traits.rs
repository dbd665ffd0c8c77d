use async_trait::async_trait;
use thiserror::Error;
use crate::entity::EntityId;
use crate::registry::{FieldSnapshot, IndexableType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The index service cannot be reached. Callers degrade, they do not fail.
    #[error("index unavailable: {0}")]
    Unavailable(String),
    #[error("index backend error: {0}")]
    Backend(String),
    /// Queried a type whose namespace was never provisioned
    #[error("no index namespace for '{0}'")]
    UnknownNamespace(String),
}

impl IndexError {
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}

/// One page of query results in relevance order.
///
/// `total` counts every match, so it may exceed `ids.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexHit {
    pub ids: Vec<EntityId>,
    pub total: u64,
}

impl IndexHit {
    pub fn new(ids: Vec<EntityId>, total: u64) -> Self {
        Self { ids, total }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// `(id, rank position)` pairs, best match first.
    pub fn ranked(&self) -> impl Iterator<Item = (EntityId, usize)> + '_ {
        self.ids.iter().enumerate().map(|(rank, id)| (*id, rank))
    }
}

/// The only component that talks to the index service.
///
/// Every call is atomic on its own and safe to interleave with any other.
#[async_trait]
pub trait IndexGateway: Send + Sync {
    /// Replace the entry for `(kind, id)`. Idempotent.
    async fn upsert(&self, kind: &str, id: EntityId, fields: &FieldSnapshot) -> Result<(), IndexError>;

    /// Remove the entry for `(kind, id)`. Removing a missing entry is not an error.
    async fn remove(&self, kind: &str, id: EntityId) -> Result<(), IndexError>;

    /// Ids on the requested page (1-based) in relevance order, plus the total match count.
    async fn query(
        &self,
        kind: &str,
        expression: &str,
        page: u32,
        per_page: u32,
    ) -> Result<IndexHit, IndexError>;

    /// Create the namespace for a type if it does not exist yet.
    async fn ensure_namespace(&self, indexable: &IndexableType) -> Result<(), IndexError>;

    /// Drop every entry of a type, leaving an empty namespace behind.
    async fn clear(&self, indexable: &IndexableType) -> Result<(), IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_positions_follow_hit_order() {
        let hit = IndexHit::new(vec![7, 3, 9], 12);

        let ranked: Vec<(EntityId, usize)> = hit.ranked().collect();
        assert_eq!(ranked, vec![(7, 0), (3, 1), (9, 2)]);
        assert_eq!(hit.total, 12);
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(IndexError::Unavailable("down".into()).is_unavailable());
        assert!(!IndexError::Backend("syntax".into()).is_unavailable());
        assert!(!IndexError::UnknownNamespace("item".into()).is_unavailable());
    }
}
