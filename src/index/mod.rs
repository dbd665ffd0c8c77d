//! Index gateway: the boundary to the full-text index service.
//!
//! - [`traits::IndexGateway`] - upsert, remove, query, namespace provisioning
//! - [`memory::InMemoryIndex`] - in-process index for tests and embedded use
//! - [`redis::RediSearchIndex`] - Redis Stack (RediSearch over RedisJSON)
//! - [`circuit::CircuitIndex`] - fail-fast wrapper around any gateway

pub mod circuit;
pub mod memory;
pub mod redis;
pub mod traits;

pub use circuit::CircuitIndex;
pub use memory::{InMemoryIndex, IndexOp};
pub use self::redis::RediSearchIndex;
pub use traits::{IndexError, IndexGateway, IndexHit};
