// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Indexable Registry
//!
//! Static description of which entity types are searchable and which of
//! their columns feed the index. Being searchable is a registry lookup,
//! not a property of the entity type itself.
//!
//! ```
//! use search_sync::{IndexRegistry, IndexableType};
//!
//! let mut registry = IndexRegistry::new();
//! registry
//!     .register(IndexableType::new("item").text_sortable("title").text("description"))
//!     .unwrap();
//!
//! assert!(registry.is_indexable("item"));
//! assert!(!registry.is_indexable("user"));
//! ```
//!
//! # RediSearch Namespace
//!
//! Each type maps to one index over JSON documents keyed by
//! `{prefix}{type}:{id}`:
//!
//! ```text
//! FT.CREATE idx:item
//!   ON JSON
//!   PREFIX 1 item:
//!   SCHEMA
//!     $.payload.title AS title TEXT SORTABLE
//!     $.payload.description AS description TEXT
//! ```

use std::collections::HashMap;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::entity::Entity;

/// Indexed column values captured from one entity.
pub type FieldSnapshot = Map<String, Value>;

/// Attempted to register a type name twice.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("indexable type '{0}' is already registered")]
pub struct DuplicateType(pub String);

/// An entity type participating in search.
#[derive(Debug, Clone)]
pub struct IndexableType {
    /// Stable type name, also the index namespace
    pub name: String,
    /// Indexed columns
    pub fields: Vec<IndexedField>,
}

impl IndexableType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a full-text field
    pub fn text(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Text, false)
    }

    /// Add a sortable full-text field
    pub fn text_sortable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Text, true)
    }

    /// Add an exact-match tag field
    pub fn tag(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Tag, false)
    }

    /// Add a numeric field
    pub fn numeric(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Numeric, false)
    }

    /// Add a sortable numeric field
    pub fn numeric_sortable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Numeric, true)
    }

    fn field(mut self, name: impl Into<String>, kind: FieldKind, sortable: bool) -> Self {
        self.fields.push(IndexedField {
            name: name.into(),
            kind,
            sortable,
        });
        self
    }

    /// Copy the indexed columns out of an entity.
    ///
    /// Columns that are absent or null are left out of the snapshot.
    #[must_use]
    pub fn snapshot(&self, entity: &Entity) -> FieldSnapshot {
        let mut snapshot = Map::new();
        for field in &self.fields {
            match entity.field(&field.name) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    snapshot.insert(field.name.clone(), value.clone());
                }
            }
        }
        snapshot
    }

    /// Key prefix covered by this type's index
    #[must_use]
    pub fn key_prefix(&self, redis_prefix: Option<&str>) -> String {
        format!("{}{}:", redis_prefix.unwrap_or(""), self.name)
    }

    /// Index name for this type
    #[must_use]
    pub fn index_name(&self, redis_prefix: Option<&str>) -> String {
        format!("{}idx:{}", redis_prefix.unwrap_or(""), self.name)
    }

    /// Generate FT.CREATE args with optional global redis prefix
    ///
    /// The prefix is prepended to both the index name and the key prefix
    /// to match the actual key structure in Redis.
    #[must_use]
    pub fn to_ft_create_args(&self, redis_prefix: Option<&str>) -> Vec<String> {
        let mut args = vec![
            self.index_name(redis_prefix),
            "ON".to_string(),
            "JSON".to_string(),
            "PREFIX".to_string(),
            "1".to_string(),
            self.key_prefix(redis_prefix),
            "SCHEMA".to_string(),
        ];

        for field in &self.fields {
            args.extend(field.to_schema_args());
        }

        args
    }
}

/// One indexed column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedField {
    pub name: String,
    pub kind: FieldKind,
    pub sortable: bool,
}

impl IndexedField {
    fn to_schema_args(&self) -> Vec<String> {
        // Documents wrap the snapshot under $.payload
        let mut args = vec![
            format!("$.payload.{}", self.name),
            "AS".to_string(),
            self.name.clone(),
            self.kind.to_string(),
        ];

        if self.sortable {
            args.push("SORTABLE".to_string());
        }

        args
    }
}

/// Indexed column kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Tokenized, relevance-ranked text
    Text,
    /// Exact-match tag
    Tag,
    /// Numeric value
    Numeric,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Text => write!(f, "TEXT"),
            FieldKind::Tag => write!(f, "TAG"),
            FieldKind::Numeric => write!(f, "NUMERIC"),
        }
    }
}

/// Registered indexable types by name. Read-only once the engine starts.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    types: HashMap<String, IndexableType>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Names must be unique.
    pub fn register(&mut self, indexable: IndexableType) -> Result<(), DuplicateType> {
        if self.types.contains_key(&indexable.name) {
            return Err(DuplicateType(indexable.name));
        }
        self.types.insert(indexable.name.clone(), indexable);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&IndexableType> {
        self.types.get(name)
    }

    #[must_use]
    pub fn is_indexable(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered types, sorted by name
    pub fn all(&self) -> Vec<&IndexableType> {
        let mut types: Vec<&IndexableType> = self.types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
