use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use crate::entity::{Entity, EntityId, EntityKey};
use super::traits::{PrimaryStore, StoreError, Write};

type Table = BTreeMap<EntityId, Entity>;

/// In-process primary store. Rows of a type are kept ordered by id.
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    /// Number of `get_many` calls served
    batch_lookups: AtomicU64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            batch_lookups: AtomicU64::new(0),
        }
    }

    /// Store pre-populated with rows, bypassing unit-of-work bookkeeping.
    #[must_use]
    pub fn with_rows(rows: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for entity in rows {
                tables
                    .entry(entity.kind.clone())
                    .or_default()
                    .insert(entity.id, entity);
            }
        }
        store
    }

    /// Total rows across all types
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn batch_lookups(&self) -> u64 {
        self.batch_lookups.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for InMemoryStore {
    async fn get_many(&self, kind: &str, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        self.batch_lookups.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        let Some(table) = tables.get(kind) else {
            return Ok(Vec::new());
        };
        // Walk the table, not the id list, so rows come back in storage order
        Ok(table
            .values()
            .filter(|entity| ids.contains(&entity.id))
            .cloned()
            .collect())
    }

    async fn scan(&self, kind: &str, offset: u64, limit: usize) -> Result<Vec<Entity>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(kind)
            .map(|table| {
                table
                    .values()
                    .skip(offset as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan_after(
        &self,
        kind: &str,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let tables = self.tables.read();
        Ok(tables
            .get(kind)
            .map(|table| {
                table
                    .range((lower, Bound::Unbounded))
                    .take(limit)
                    .map(|(_, entity)| entity.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, kind: &str) -> Result<u64, StoreError> {
        Ok(self.tables.read().get(kind).map_or(0, |t| t.len() as u64))
    }

    async fn commit(&self, writes: &[Write]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();

        // Stage every write against an overlay first; tables stay untouched on error
        let mut staged: BTreeMap<EntityKey, Option<Entity>> = BTreeMap::new();
        for write in writes {
            let key = write.key();
            let exists = match staged.get(&key) {
                Some(slot) => slot.is_some(),
                None => tables
                    .get(&key.kind)
                    .is_some_and(|t| t.contains_key(&key.id)),
            };
            match write {
                Write::Insert(entity) => {
                    if exists {
                        return Err(StoreError::Conflict { kind: key.kind, id: key.id });
                    }
                    staged.insert(key, Some(entity.clone()));
                }
                Write::Update(entity) => {
                    if !exists {
                        return Err(StoreError::NotFound { kind: key.kind, id: key.id });
                    }
                    staged.insert(key, Some(entity.clone()));
                }
                Write::Delete { .. } => {
                    if !exists {
                        return Err(StoreError::NotFound { kind: key.kind, id: key.id });
                    }
                    staged.insert(key, None);
                }
            }
        }

        for (key, row) in staged {
            let table = tables.entry(key.kind).or_default();
            match row {
                Some(entity) => {
                    table.insert(key.id, entity);
                }
                None => {
                    table.remove(&key.id);
                }
            }
        }
        Ok(())
    }
}
