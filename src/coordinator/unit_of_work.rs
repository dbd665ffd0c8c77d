// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Unit of work: pending store writes plus the change collector they feed.
//!
//! ```text
//! begin() ─► insert / update / delete ─► commit() ─► store.commit(writes)
//!                 │                                        │ ok
//!                 ▼                                        ▼
//!        collector.record()                 propagator.submit(collector.drain())
//!
//! rollback() or drop ─► writes and collector discarded, nothing propagated
//! ```
//!
//! Only types in the registry are recorded; everything else is a plain
//! store write.

use tracing::{debug, warn};

use crate::change_set::{ChangeCollector, Mutation};
use crate::entity::{Entity, EntityKey};
use crate::registry::FieldSnapshot;
use crate::storage::traits::{StoreError, Write};

use super::{CommitOutcome, SearchSync};

pub struct UnitOfWork<'a> {
    engine: &'a SearchSync,
    writes: Vec<Write>,
    collector: ChangeCollector,
    finished: bool,
}

impl SearchSync {
    /// Open a unit of work. Nothing reaches the store until it commits.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            engine: self,
            writes: Vec::new(),
            collector: ChangeCollector::new(),
            finished: false,
        }
    }
}

impl<'a> UnitOfWork<'a> {
    pub fn insert(&mut self, entity: Entity) {
        self.observe(&entity, Mutation::Created);
        self.writes.push(Write::Insert(entity));
    }

    pub fn update(&mut self, entity: Entity) {
        self.observe(&entity, Mutation::Modified);
        self.writes.push(Write::Update(entity));
    }

    pub fn delete(&mut self, key: EntityKey) {
        if self.engine.registry.is_indexable(&key.kind) {
            self.collector.record(key.clone(), Mutation::Deleted);
        }
        self.writes.push(Write::Delete { kind: key.kind, id: key.id });
    }

    fn observe(&mut self, entity: &Entity, mutation: fn(FieldSnapshot) -> Mutation) {
        let Some(indexable) = self.engine.registry.get(&entity.kind) else {
            return;
        };
        self.collector.record(entity.key(), mutation(indexable.snapshot(entity)));
    }

    /// Store writes staged so far
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Entities with a net index change so far
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.collector.len()
    }

    /// Apply the writes atomically, then hand the change set to the propagator.
    ///
    /// Success or failure depends only on the store. Index trouble is
    /// handled by the propagator and never turns into an error here.
    #[tracing::instrument(skip(self), fields(writes = self.writes.len(), changes = self.collector.len()))]
    pub async fn commit(mut self) -> Result<CommitOutcome, StoreError> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes);
        let engine = self.engine;
        let store = engine.store()?;

        let _order = engine.commit_order.lock().await;
        if let Err(e) = store.commit(&writes).await {
            self.collector.clear();
            warn!(error = %e, "Commit failed, change set discarded");
            return Err(e);
        }

        let change_set = self.collector.drain();
        let (upserts, deletes) = change_set.counts();
        let propagation = engine.propagator.submit(change_set).await;

        debug!(writes = writes.len(), upserts, deletes, "Unit of work committed");
        Ok(CommitOutcome {
            writes: writes.len(),
            upserts,
            deletes,
            propagation,
        })
    }

    /// Discard all pending writes and changes.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(writes = self.writes.len(), "Unit of work rolled back");
        self.writes.clear();
        self.collector.clear();
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            debug!(writes = self.writes.len(), "Unit of work dropped without commit, rolled back");
        }
    }
}
