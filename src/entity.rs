//! Entity records.
//!
//! An [`Entity`] is one row of the primary store: a type name, an integer
//! primary key, and a JSON object holding the row's columns.
//!
//! # Example
//!
//! ```
//! use search_sync::Entity;
//! use serde_json::json;
//!
//! let item = Entity::new("item", 7, json!({"title": "Oak table", "price": 120.0}));
//!
//! assert_eq!(item.key().to_string(), "item:7");
//! assert_eq!(item.field("title"), Some(&json!("Oak table")));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Primary key of an entity within its type.
pub type EntityId = i64;

/// A row of the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Type name (e.g. `item`, `group`)
    pub kind: String,
    /// Primary key, unique within `kind`
    pub id: EntityId,
    /// Column values as a JSON object
    pub data: Value,
}

impl Entity {
    pub fn new(kind: impl Into<String>, id: EntityId, data: Value) -> Self {
        Self {
            kind: kind.into(),
            id,
            data,
        }
    }

    /// Read a top-level column.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind.clone(), self.id)
    }
}

/// `(type, id)` pair identifying an entity across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: String,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, id: EntityId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
