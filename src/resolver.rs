// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rank-Preserving Resolver
//!
//! Turns an index hit (ids in relevance order) back into store rows without
//! letting the store's own ordering leak into the result.
//!
//! ```text
//! query(kind, expr, page, per_page) ──► IndexHit { ids: [7, 3, 9], total }
//!        │ total == 0 → empty, store untouched
//!        ▼
//! get_many(kind, [7, 3, 9])  ──► rows in store order [3, 7, 9]
//!        ▼
//! position map {7:0, 3:1, 9:2} + stable sort ──► [7, 3, 9]
//! ```
//!
//! Ids the store no longer has are dropped (drift) and counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::entity::{Entity, EntityId};
use crate::index::{IndexError, IndexGateway, IndexHit};
use crate::metrics;
use crate::registry::IndexableType;
use crate::storage::traits::{PrimaryStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One hydrated page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    /// Rows in relevance order
    pub entities: Vec<Entity>,
    /// Total matches reported by the index
    pub total: u64,
    /// Index ids with no store row
    pub dropped: usize,
}

pub struct RankPreservingResolver {
    store: Arc<dyn PrimaryStore>,
    gateway: Arc<dyn IndexGateway>,
}

impl RankPreservingResolver {
    pub fn new(store: Arc<dyn PrimaryStore>, gateway: Arc<dyn IndexGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn search(
        &self,
        indexable: &IndexableType,
        expression: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Resolved, ResolveError> {
        let start = Instant::now();
        let kind = indexable.name.as_str();

        let hit = self.gateway.query(kind, expression, page, per_page).await?;
        if hit.total == 0 || hit.ids.is_empty() {
            metrics::record_search_results(0);
            metrics::record_search_latency(kind, start.elapsed());
            return Ok(Resolved { total: hit.total, ..Resolved::default() });
        }

        let positions = rank_positions(&hit);
        let ids: Vec<EntityId> = unique_in_rank_order(&hit);
        let rows = {
            let _timer = metrics::LatencyTimer::new("resolver", "hydrate");
            self.store.get_many(kind, &ids).await?
        };

        let (entities, unranked) = restore_rank(&positions, rows);
        if unranked > 0 {
            debug!(kind = %kind, unranked, "Store rows with no matching index id, skipped");
        }
        let dropped = ids.len().saturating_sub(entities.len());
        if dropped > 0 {
            metrics::record_drift(kind, dropped);
            debug!(kind = %kind, dropped, requested = ids.len(), "Index ids missing from store, dropped");
        }

        metrics::record_search_results(entities.len());
        metrics::record_search_latency(kind, start.elapsed());
        Ok(Resolved { entities, total: hit.total, dropped })
    }
}

/// id → first rank position at which it appears.
fn rank_positions(hit: &IndexHit) -> HashMap<EntityId, usize> {
    let mut positions = HashMap::with_capacity(hit.ids.len());
    for (id, rank) in hit.ranked() {
        positions.entry(id).or_insert(rank);
    }
    positions
}

fn unique_in_rank_order(hit: &IndexHit) -> Vec<EntityId> {
    let mut seen = std::collections::HashSet::with_capacity(hit.ids.len());
    hit.ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Reorder fetched rows by rank. Rows without a rank are dropped and counted.
fn restore_rank(
    positions: &HashMap<EntityId, usize>,
    rows: Vec<Entity>,
) -> (Vec<Entity>, usize) {
    let mut ranked: Vec<(usize, Entity)> = Vec::with_capacity(rows.len());
    let mut unranked = 0;
    for row in rows {
        match positions.get(&row.id) {
            Some(&rank) => ranked.push((rank, row)),
            None => unranked += 1,
        }
    }
    ranked.sort_by_key(|(rank, _)| *rank);
    (ranked.into_iter().map(|(_, row)| row).collect(), unranked)
}
