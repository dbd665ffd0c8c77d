//! Reindexer: rebuild a type's index entries from the primary store.
//!
//! A rebuild walks the store in primary-key order, `reindex_batch_size` rows
//! at a time, and upserts each row's snapshot. Each batch resumes after the
//! last key seen, so rows deleted mid-rebuild never push a survivor out of
//! the walk. Upserts are idempotent, so running it twice leaves the same
//! index as running it once, and it can overlap live propagation without
//! coordination.
//!
//! A plain rebuild never removes anything. [`Reindexer::rebuild_clean`]
//! clears the namespace first to get rid of orphaned entries.
//!
//! A failure stops the rebuild where it is. Entries written so far stay.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::entity::EntityId;
use crate::index::{IndexError, IndexGateway};
use crate::metrics;
use crate::registry::{IndexRegistry, IndexableType};
use crate::storage::traits::{PrimaryStore, StoreError};

#[derive(Debug, Error)]
pub enum ReindexError {
    #[error("type '{0}' is not indexable")]
    UnknownType(String),
    /// No index gateway to rebuild into
    #[error("search is disabled")]
    Disabled,
    #[error("store read failed after {indexed} entities: {source}")]
    Store {
        indexed: usize,
        #[source]
        source: StoreError,
    },
    #[error("index write failed after {indexed} entities: {source}")]
    Index {
        indexed: usize,
        #[source]
        source: IndexError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReindexReport {
    pub kind: String,
    /// Entities upserted
    pub indexed: usize,
    pub batches: usize,
    /// Namespace was cleared before rebuilding
    pub cleared: bool,
    pub elapsed: Duration,
}

pub struct Reindexer {
    registry: Arc<IndexRegistry>,
    store: Arc<dyn PrimaryStore>,
    gateway: Arc<dyn IndexGateway>,
    batch_size: usize,
}

impl Reindexer {
    pub fn new(
        registry: Arc<IndexRegistry>,
        store: Arc<dyn PrimaryStore>,
        gateway: Arc<dyn IndexGateway>,
        batch_size: usize,
    ) -> Self {
        Self {
            registry,
            store,
            gateway,
            batch_size: batch_size.max(1),
        }
    }

    fn indexable(&self, kind: &str) -> Result<&IndexableType, ReindexError> {
        self.registry
            .get(kind)
            .ok_or_else(|| ReindexError::UnknownType(kind.to_string()))
    }

    /// Upsert every entity of `kind` from the store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self, kind: &str) -> Result<ReindexReport, ReindexError> {
        let indexable = self.indexable(kind)?;
        self.gateway
            .ensure_namespace(indexable)
            .await
            .map_err(|source| ReindexError::Index { indexed: 0, source })?;
        self.run(indexable, false).await
    }

    /// Clear the namespace, then rebuild. Removes entries with no store row.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_clean(&self, kind: &str) -> Result<ReindexReport, ReindexError> {
        let indexable = self.indexable(kind)?;
        self.gateway
            .clear(indexable)
            .await
            .map_err(|source| ReindexError::Index { indexed: 0, source })?;
        self.run(indexable, true).await
    }

    /// Rebuild every registered type, stopping at the first failure.
    pub async fn rebuild_all(&self) -> Result<Vec<ReindexReport>, ReindexError> {
        let mut reports = Vec::with_capacity(self.registry.len());
        for indexable in self.registry.all() {
            reports.push(self.rebuild(&indexable.name).await?);
        }
        Ok(reports)
    }

    async fn run(&self, indexable: &IndexableType, cleared: bool) -> Result<ReindexReport, ReindexError> {
        let start = Instant::now();
        let kind = indexable.name.as_str();
        let mut indexed = 0usize;
        let mut batches = 0usize;
        let mut cursor: Option<EntityId> = None;

        let result = loop {
            let rows = match self.store.scan_after(kind, cursor, self.batch_size).await {
                Ok(rows) => rows,
                Err(source) => break Err(ReindexError::Store { indexed, source }),
            };
            if rows.is_empty() {
                break Ok(());
            }
            batches += 1;
            let fetched = rows.len();

            let mut failed = None;
            for row in &rows {
                let fields = indexable.snapshot(row);
                if let Err(source) = self.gateway.upsert(kind, row.id, &fields).await {
                    failed = Some(source);
                    break;
                }
                indexed += 1;
            }
            if let Some(source) = failed {
                break Err(ReindexError::Index { indexed, source });
            }

            if fetched < self.batch_size {
                break Ok(());
            }
            cursor = rows.last().map(|row| row.id);
        };

        metrics::record_reindexed(kind, indexed);
        match result {
            Ok(()) => {
                metrics::record_reindex_run(kind, true);
                info!(kind = %kind, indexed, batches, cleared, "Rebuild complete");
                Ok(ReindexReport {
                    kind: kind.to_string(),
                    indexed,
                    batches,
                    cleared,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                metrics::record_reindex_run(kind, false);
                warn!(kind = %kind, indexed, error = %e, "Rebuild aborted, index partially rebuilt");
                Err(e)
            }
        }
    }
}
