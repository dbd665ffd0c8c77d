//! Search API implementation for SearchSync.
//!
//! # Architecture
//!
//! ```text
//! search(kind, expression, request)
//!       │
//!       ├─→ no index configured  ──► empty, SearchSource::Disabled
//!       ├─→ blank expression     ──► empty, SearchSource::Index
//!       ├─→ FT.SEARCH (ids, total) + batch hydrate + rank restore
//!       │         │
//!       │         └─→ index failure ──► empty, SearchSource::Unavailable
//!       ▼
//!   Paginated<Entity>  (same Page math as list())
//! ```

use std::sync::Arc;
use tracing::{debug, warn};

use crate::entity::{Entity, EntityId};
use crate::index::IndexGateway;
use crate::metrics;
use crate::pagination::{Page, PageRequest, Paginated};
use crate::reindex::{ReindexError, ReindexReport, Reindexer};
use crate::resolver::{RankPreservingResolver, ResolveError};
use crate::storage::traits::StoreError;

use super::{SearchError, SearchResponse, SearchSource, SearchSync};

impl SearchSync {
    // ═══════════════════════════════════════════════════════════════════════════
    // Search API
    // ═══════════════════════════════════════════════════════════════════════════

    /// Full-text search over one indexable type.
    ///
    /// Results come back in relevance order with the same pagination shape
    /// as [`list()`](Self::list). Index trouble never fails the call; it
    /// yields an empty page flagged as degraded. Store trouble while
    /// hydrating does fail it.
    pub async fn search(
        &self,
        kind: &str,
        expression: &str,
        request: PageRequest,
    ) -> Result<SearchResponse, SearchError> {
        let indexable = self
            .registry
            .get(kind)
            .ok_or_else(|| SearchError::UnknownType(kind.to_string()))?;
        let PageRequest { page, per_page } = self.config.normalize(request);

        let Some(index) = self.index.clone() else {
            let source = if self.index_configured {
                SearchSource::Unavailable
            } else {
                SearchSource::Disabled
            };
            metrics::record_search_query(kind, &source.to_string());
            return Ok(Self::empty_response(per_page, page, source));
        };

        if expression.trim().is_empty() {
            debug!(kind = %kind, "Blank search expression, nothing to query");
            return Ok(Self::empty_response(per_page, page, SearchSource::Index));
        }

        let resolver = RankPreservingResolver::new(Arc::clone(self.store()?), index);
        match resolver.search(indexable, expression, page, per_page).await {
            Ok(resolved) => {
                metrics::record_search_query(kind, "success");
                let meta = Page::new(resolved.total, per_page, page);
                Ok(SearchResponse {
                    results: Paginated::new(resolved.entities, meta),
                    source: SearchSource::Index,
                })
            }
            Err(ResolveError::Index(e)) => {
                metrics::record_search_query(kind, "unavailable");
                warn!(kind = %kind, error = %e, "Index query failed, returning degraded result");
                Ok(Self::empty_response(per_page, page, SearchSource::Unavailable))
            }
            Err(ResolveError::Store(e)) => {
                metrics::record_search_query(kind, "failure");
                Err(SearchError::Store(e))
            }
        }
    }

    fn empty_response(per_page: u32, page: u32, source: SearchSource) -> SearchResponse {
        SearchResponse {
            results: Paginated::empty(per_page, page),
            source,
        }
    }

    /// Ordinary listing of any type in primary-key order.
    pub async fn list(&self, kind: &str, request: PageRequest) -> Result<Paginated<Entity>, StoreError> {
        let PageRequest { page, per_page } = self.config.normalize(request);
        let store = self.store()?;

        let total = store.count(kind).await?;
        let meta = Page::new(total, per_page, page);
        let items = if meta.offset() < total {
            store.scan(kind, meta.offset(), meta.limit()).await?
        } else {
            Vec::new()
        };
        Ok(Paginated::new(items, meta))
    }

    /// Point lookup in the primary store.
    pub async fn get(&self, kind: &str, id: EntityId) -> Result<Option<Entity>, StoreError> {
        self.store()?.get(kind, id).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reindex API
    // ═══════════════════════════════════════════════════════════════════════════

    fn reindexer(&self) -> Result<Reindexer, ReindexError> {
        let index: Arc<dyn IndexGateway> = self.index.clone().ok_or(ReindexError::Disabled)?;
        let store = self
            .store()
            .map_err(|source| ReindexError::Store { indexed: 0, source })?;
        Ok(Reindexer::new(
            Arc::clone(&self.registry),
            Arc::clone(store),
            index,
            self.config.reindex_batch_size,
        ))
    }

    /// Upsert every row of `kind` into the index.
    pub async fn reindex(&self, kind: &str) -> Result<ReindexReport, ReindexError> {
        self.reindexer()?.rebuild(kind).await
    }

    /// Clear the namespace of `kind`, then rebuild it.
    pub async fn reindex_clean(&self, kind: &str) -> Result<ReindexReport, ReindexError> {
        self.reindexer()?.rebuild_clean(kind).await
    }

    /// Rebuild every registered type.
    pub async fn reindex_all(&self) -> Result<Vec<ReindexReport>, ReindexError> {
        self.reindexer()?.rebuild_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSyncConfig;
    use crate::index::InMemoryIndex;
    use crate::registry::{IndexRegistry, IndexableType};
    use crate::storage::memory::InMemoryStore;
    use serde_json::json;

    fn registry() -> IndexRegistry {
        let mut registry = IndexRegistry::new();
        registry.register(IndexableType::new("item").text("title")).unwrap();
        registry
    }

    fn rows(n: i64) -> Vec<Entity> {
        (1..=n)
            .map(|id| Entity::new("item", id, json!({"title": format!("lamp {}", id)})))
            .collect()
    }

    async fn started(store: Arc<InMemoryStore>, index: Option<Arc<InMemoryIndex>>) -> SearchSync {
        let index = index.map(|i| i as Arc<dyn IndexGateway>);
        let mut engine = SearchSync::with_backends(SearchSyncConfig::default(), registry(), store, index);
        engine.start().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_search_unknown_type() {
        let engine = started(Arc::new(InMemoryStore::new()), Some(Arc::new(InMemoryIndex::new()))).await;

        let err = engine.search("user", "ann", PageRequest::default()).await.unwrap_err();
        assert!(matches!(err, SearchError::UnknownType(ref k) if k == "user"));
    }

    #[tokio::test]
    async fn test_search_disabled_without_index() {
        let engine = started(Arc::new(InMemoryStore::with_rows(rows(3))), None).await;

        let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();

        assert_eq!(response.source, SearchSource::Disabled);
        assert!(response.results.items.is_empty());
        assert_eq!(response.results.meta.total_items, 0);
    }

    #[tokio::test]
    async fn test_search_degrades_when_index_down() {
        let index = Arc::new(InMemoryIndex::new());
        let engine = started(Arc::new(InMemoryStore::with_rows(rows(3))), Some(index.clone())).await;
        index.set_available(false);

        let response = engine.search("item", "lamp", PageRequest::default()).await.unwrap();

        assert_eq!(response.source, SearchSource::Unavailable);
        assert!(response.is_degraded());
        assert!(response.results.items.is_empty());
    }

    #[tokio::test]
    async fn test_blank_expression_skips_index() {
        let index = Arc::new(InMemoryIndex::new());
        let engine = started(Arc::new(InMemoryStore::new()), Some(index.clone())).await;

        let response = engine.search("item", "   ", PageRequest::default()).await.unwrap();

        assert_eq!(response.source, SearchSource::Index);
        assert_eq!(index.query_count(), 0);
    }

    #[tokio::test]
    async fn test_search_clamps_per_page() {
        let store = Arc::new(InMemoryStore::with_rows(rows(3)));
        let index = Arc::new(InMemoryIndex::new());
        let engine = started(store, Some(index)).await;
        engine.reindex("item").await.unwrap();

        let response = engine.search("item", "lamp", PageRequest::new(0, 5000)).await.unwrap();

        assert_eq!(response.results.meta.page, 1);
        assert_eq!(response.results.meta.per_page, 100);
        assert_eq!(response.results.items.len(), 3);
    }

    #[tokio::test]
    async fn test_list_pages_in_id_order() {
        let engine = started(Arc::new(InMemoryStore::with_rows(rows(47))), None).await;

        let listing = engine.list("item", PageRequest::new(3, 10)).await.unwrap();

        assert_eq!(listing.meta.total_pages, 5);
        assert!(listing.meta.has_next());
        assert!(listing.meta.has_prev());
        let ids: Vec<EntityId> = listing.items.iter().map(|e| e.id).collect();
        assert_eq!(ids, (21..=30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_list_past_the_end_is_empty() {
        let engine = started(Arc::new(InMemoryStore::with_rows(rows(5))), None).await;

        let listing = engine.list("item", PageRequest::new(4, 10)).await.unwrap();

        assert!(listing.items.is_empty());
        assert_eq!(listing.meta.total_items, 5);
        assert!(!listing.meta.has_next());
    }

    #[tokio::test]
    async fn test_reindex_requires_index() {
        let engine = started(Arc::new(InMemoryStore::new()), None).await;

        assert!(matches!(engine.reindex("item").await, Err(ReindexError::Disabled)));
    }
}
