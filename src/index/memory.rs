//! In-process index.
//!
//! Relevance is a plain term count: a document matches when every query
//! term occurs in its indexed text, and scores the number of occurrences.
//! Ties go to the lower id. The expression `*` matches everything.
//!
//! The index can be switched off to simulate an outage, made to fail for
//! chosen entities, and keeps a journal of the mutations it applied.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::entity::{EntityId, EntityKey};
use crate::registry::{FieldSnapshot, IndexableType};
use super::traits::{IndexError, IndexGateway, IndexHit};

/// A mutation applied to the in-memory index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    Upsert { kind: String, id: EntityId, fields: FieldSnapshot },
    Remove { kind: String, id: EntityId },
    Clear { kind: String },
}

impl IndexOp {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            IndexOp::Upsert { kind, .. } | IndexOp::Remove { kind, .. } | IndexOp::Clear { kind } => kind,
        }
    }
}

pub struct InMemoryIndex {
    namespaces: DashSet<String>,
    documents: DashMap<EntityKey, FieldSnapshot>,
    available: AtomicBool,
    failing: DashSet<EntityKey>,
    journal: Mutex<Vec<IndexOp>>,
    queries: AtomicU64,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespaces: DashSet::new(),
            documents: DashMap::new(),
            available: AtomicBool::new(true),
            failing: DashSet::new(),
            journal: Mutex::new(Vec::new()),
            queries: AtomicU64::new(0),
        }
    }

    /// Switch the index on or off. While off every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make mutations of one entity fail with a backend error.
    pub fn fail_on(&self, kind: &str, id: EntityId) {
        self.failing.insert(EntityKey::new(kind, id));
    }

    /// Fields currently indexed for an entity
    #[must_use]
    pub fn document(&self, kind: &str, id: EntityId) -> Option<FieldSnapshot> {
        self.documents
            .get(&EntityKey::new(kind, id))
            .map(|doc| doc.value().clone())
    }

    /// Indexed ids of a type, ascending
    #[must_use]
    pub fn ids(&self, kind: &str) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .documents
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| entry.key().id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of indexed documents across all types
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Mutations applied so far, in order
    #[must_use]
    pub fn journal(&self) -> Vec<IndexOp> {
        self.journal.lock().clone()
    }

    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable("in-memory index switched off".into()))
        }
    }

    fn check_failing(&self, key: &EntityKey) -> Result<(), IndexError> {
        if self.failing.contains(key) {
            return Err(IndexError::Backend(format!("rejected write for {}", key)));
        }
        Ok(())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        Value::Null => {}
    }
}

/// Occurrences of the query terms in a document, or `None` if some term is missing.
fn score(fields: &FieldSnapshot, terms: &[String]) -> Option<usize> {
    let mut tokens = Vec::new();
    fields.values().for_each(|v| collect_text(v, &mut tokens));

    let mut total = 0;
    for term in terms {
        let hits = tokens.iter().filter(|t| *t == term).count();
        if hits == 0 {
            return None;
        }
        total += hits;
    }
    Some(total)
}

#[async_trait]
impl IndexGateway for InMemoryIndex {
    async fn upsert(&self, kind: &str, id: EntityId, fields: &FieldSnapshot) -> Result<(), IndexError> {
        self.check_available()?;
        let key = EntityKey::new(kind, id);
        self.check_failing(&key)?;

        self.namespaces.insert(kind.to_string());
        self.documents.insert(key, fields.clone());
        self.journal.lock().push(IndexOp::Upsert {
            kind: kind.to_string(),
            id,
            fields: fields.clone(),
        });
        Ok(())
    }

    async fn remove(&self, kind: &str, id: EntityId) -> Result<(), IndexError> {
        self.check_available()?;
        let key = EntityKey::new(kind, id);
        self.check_failing(&key)?;

        self.documents.remove(&key);
        self.journal.lock().push(IndexOp::Remove { kind: kind.to_string(), id });
        Ok(())
    }

    async fn query(
        &self,
        kind: &str,
        expression: &str,
        page: u32,
        per_page: u32,
    ) -> Result<IndexHit, IndexError> {
        self.check_available()?;
        self.queries.fetch_add(1, Ordering::Relaxed);

        if !self.namespaces.contains(kind) {
            return Err(IndexError::UnknownNamespace(kind.to_string()));
        }

        let match_all = expression.trim() == "*";
        let terms: Vec<String> = tokenize(expression).collect();
        if terms.is_empty() && !match_all {
            return Ok(IndexHit::empty());
        }

        let mut scored: Vec<(usize, EntityId)> = self
            .documents
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .filter_map(|entry| {
                if match_all {
                    Some((0, entry.key().id))
                } else {
                    score(entry.value(), &terms).map(|s| (s, entry.key().id))
                }
            })
            .collect();

        // Highest score first, ties by ascending id
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let total = scored.len() as u64;
        let offset = (page.max(1) as usize - 1) * per_page as usize;
        let ids = scored
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .map(|(_, id)| id)
            .collect();

        Ok(IndexHit::new(ids, total))
    }

    async fn ensure_namespace(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        self.check_available()?;
        self.namespaces.insert(indexable.name.clone());
        Ok(())
    }

    async fn clear(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        self.check_available()?;
        self.documents.retain(|key, _| key.kind != indexable.name);
        self.namespaces.insert(indexable.name.clone());
        self.journal.lock().push(IndexOp::Clear { kind: indexable.name.clone() });
        Ok(())
    }
}
