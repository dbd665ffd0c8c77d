// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search-sync coordinator.
//!
//! [`SearchSync`] ties the pieces together:
//! - the primary store (source of truth) behind [`PrimaryStore`]
//! - the index gateway, when search is configured
//! - the commit propagator that replays committed change sets
//! - the resolver and reindexer for reads and recovery
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Provisioning → Ready → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use search_sync::{Entity, IndexRegistry, IndexableType, PageRequest, SearchSync, SearchSyncConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = IndexRegistry::new();
//! registry.register(IndexableType::new("item").text_sortable("title").text("description"))?;
//!
//! let config = SearchSyncConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     sql_url: Some("sqlite:catalog.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let mut engine = SearchSync::new(config, registry);
//! engine.start().await?;
//!
//! let mut uow = engine.begin();
//! uow.insert(Entity::new("item", 1, json!({"title": "Oak table"})));
//! uow.commit().await?;
//!
//! engine.flush().await;
//! let found = engine.search("item", "oak", PageRequest::default()).await?;
//! println!("{} of {}", found.results.items.len(), found.results.meta.total_items);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod types;
mod lifecycle;
mod search_api;
mod unit_of_work;

pub use types::{CommitOutcome, EngineState, SearchError, SearchResponse, SearchSource};
pub use unit_of_work::UnitOfWork;

use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::config::SearchSyncConfig;
use crate::index::IndexGateway;
use crate::propagation::CommitPropagator;
use crate::registry::IndexRegistry;
use crate::storage::traits::{PrimaryStore, StoreError};

/// Main search-sync coordinator.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`. Share it behind an `Arc` once started;
/// units of work borrow it and may run concurrently.
pub struct SearchSync {
    pub(super) config: SearchSyncConfig,

    /// Indexable types, read-only after construction
    pub(super) registry: Arc<IndexRegistry>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Primary store, set at construction or by `start()`
    pub(super) store: Option<Arc<dyn PrimaryStore>>,

    /// Index gateway; `None` means search is disabled or the Redis URL is unusable
    pub(super) index: Option<Arc<dyn IndexGateway>>,

    /// An index was asked for, so a missing gateway means "unavailable"
    pub(super) index_configured: bool,

    pub(super) propagator: CommitPropagator,

    /// Held from store commit until the change set is handed to the
    /// propagator, so index order follows commit order.
    pub(super) commit_order: Mutex<()>,
}

impl SearchSync {
    /// Create an engine that connects to the backends named in `config`.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to connect and transition to `Ready`.
    pub fn new(config: SearchSyncConfig, registry: IndexRegistry) -> Self {
        let index_configured = config.redis_url.is_some();
        Self::build(config, registry, None, None, index_configured)
    }

    /// Create an engine over backends constructed by the caller.
    ///
    /// `index: None` runs with search disabled. `start()` still has to be
    /// called to provision namespaces and start propagation.
    pub fn with_backends(
        config: SearchSyncConfig,
        registry: IndexRegistry,
        store: Arc<dyn PrimaryStore>,
        index: Option<Arc<dyn IndexGateway>>,
    ) -> Self {
        let index_configured = index.is_some();
        Self::build(config, registry, Some(store), index, index_configured)
    }

    fn build(
        config: SearchSyncConfig,
        registry: IndexRegistry,
        store: Option<Arc<dyn PrimaryStore>>,
        index: Option<Arc<dyn IndexGateway>>,
        index_configured: bool,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        Self {
            config,
            registry: Arc::new(registry),
            state: state_tx,
            state_rx,
            store,
            index,
            index_configured,
            propagator: CommitPropagator::disabled(),
            commit_order: Mutex::new(()),
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    #[must_use]
    pub fn config(&self) -> &SearchSyncConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// A gateway is installed. It may still be unreachable.
    #[must_use]
    pub fn search_enabled(&self) -> bool {
        self.index.is_some()
    }

    pub(super) fn store(&self) -> Result<&Arc<dyn PrimaryStore>, StoreError> {
        self.store
            .as_ref()
            .ok_or_else(|| StoreError::Backend("engine not started".into()))
    }

    /// Wait until every change set committed so far has reached the index.
    pub async fn flush(&self) {
        self.propagator.flush().await;
    }
}
