// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-set collection for one unit of work.
//!
//! The [`ChangeCollector`] observes every pending write to an indexable
//! entity and keeps only the entity's net effect:
//!
//! ```text
//! created  → modified  ⇒ upsert (latest fields)
//! created  → deleted   ⇒ nothing
//! modified → deleted   ⇒ delete
//! deleted  → created   ⇒ upsert (the row existed before the transaction)
//! ```
//!
//! Nothing here performs I/O or can fail. [`ChangeCollector::drain`] hands
//! the collapsed [`ChangeSet`] to the propagator and leaves the collector
//! empty.
//!
//! # Example
//!
//! ```
//! use search_sync::{ChangeCollector, EntityKey, Mutation};
//! use serde_json::{json, Map};
//!
//! let mut fields = Map::new();
//! fields.insert("title".into(), json!("Draft"));
//!
//! let mut collector = ChangeCollector::new();
//! collector.record(EntityKey::new("item", 1), Mutation::Created(fields));
//! collector.record(EntityKey::new("item", 1), Mutation::Deleted);
//!
//! assert!(collector.drain().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::entity::{EntityId, EntityKey};
use crate::registry::FieldSnapshot;

/// A write observed inside a unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Entity inserted in this transaction
    Created(FieldSnapshot),
    /// Pre-existing entity updated
    Modified(FieldSnapshot),
    /// Entity deleted
    Deleted,
}

/// Net effect of a transaction on one entity
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Upserted(FieldSnapshot),
    Deleted,
}

impl Disposition {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Upserted(_) => "upsert",
            Disposition::Deleted => "delete",
        }
    }
}

/// One entity's participation in a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub kind: String,
    pub id: EntityId,
    pub disposition: Disposition,
}

impl ChangeRecord {
    pub fn upserted(kind: impl Into<String>, id: EntityId, fields: FieldSnapshot) -> Self {
        Self {
            kind: kind.into(),
            id,
            disposition: Disposition::Upserted(fields),
        }
    }

    pub fn deleted(kind: impl Into<String>, id: EntityId) -> Self {
        Self {
            kind: kind.into(),
            id,
            disposition: Disposition::Deleted,
        }
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind.clone(), self.id)
    }
}

/// A change set carried more than one disposition for the same entity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("change set holds more than one disposition for {key}")]
pub struct CollapsingViolation {
    pub key: EntityKey,
}

/// Collapsed changes of one transaction, in first-observed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    records: Vec<ChangeRecord>,
}

impl ChangeSet {
    /// Build a change set from records gathered elsewhere.
    ///
    /// Rejects input that names an entity twice.
    pub fn from_records(records: Vec<ChangeRecord>) -> Result<Self, CollapsingViolation> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert((record.kind.as_str(), record.id)) {
                return Err(CollapsingViolation { key: record.key() });
            }
        }
        Ok(Self { records })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChangeRecord> {
        self.records.iter()
    }

    /// Number of (upserts, deletes)
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        let upserts = self
            .records
            .iter()
            .filter(|r| matches!(r.disposition, Disposition::Upserted(_)))
            .count();
        (upserts, self.records.len() - upserts)
    }
}

impl IntoIterator for ChangeSet {
    type Item = ChangeRecord;
    type IntoIter = std::vec::IntoIter<ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[derive(Debug)]
struct Slot {
    record: ChangeRecord,
    /// Entity did not exist before this transaction
    created: bool,
}

/// Transaction-scoped collector. One per unit of work, never shared.
#[derive(Debug, Default)]
pub struct ChangeCollector {
    slots: Vec<Option<Slot>>,
    positions: HashMap<EntityKey, usize>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending write, merging it with earlier writes to the same entity.
    pub fn record(&mut self, key: EntityKey, mutation: Mutation) {
        if let Some(&pos) = self.positions.get(&key) {
            let created = match &self.slots[pos] {
                Some(slot) => slot.created,
                None => false,
            };
            match mutation {
                Mutation::Created(fields) | Mutation::Modified(fields) => {
                    if let Some(slot) = self.slots[pos].as_mut() {
                        slot.record.disposition = Disposition::Upserted(fields);
                    }
                }
                Mutation::Deleted if created => {
                    // Never visible outside the transaction
                    self.slots[pos] = None;
                    self.positions.remove(&key);
                }
                Mutation::Deleted => {
                    if let Some(slot) = self.slots[pos].as_mut() {
                        slot.record.disposition = Disposition::Deleted;
                    }
                }
            }
            return;
        }

        let (created, disposition) = match mutation {
            Mutation::Created(fields) => (true, Disposition::Upserted(fields)),
            Mutation::Modified(fields) => (false, Disposition::Upserted(fields)),
            Mutation::Deleted => (false, Disposition::Deleted),
        };
        let record = ChangeRecord {
            kind: key.kind.clone(),
            id: key.id,
            disposition,
        };
        self.positions.insert(key, self.slots.len());
        self.slots.push(Some(Slot { record, created }));
    }

    /// Take the collapsed change set, leaving the collector empty.
    pub fn drain(&mut self) -> ChangeSet {
        self.positions.clear();
        let records = std::mem::take(&mut self.slots)
            .into_iter()
            .flatten()
            .map(|slot| slot.record)
            .collect();
        ChangeSet { records }
    }

    /// Drop everything recorded so far (rollback)
    pub fn clear(&mut self) {
        self.slots.clear();
        self.positions.clear();
    }

    /// Number of entities with a pending net change
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
