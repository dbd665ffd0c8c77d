//! Engine lifecycle management: start and shutdown.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::index::{CircuitIndex, IndexError, IndexGateway, RediSearchIndex};
use crate::metrics;
use crate::propagation::CommitPropagator;
use crate::storage::memory::InMemoryStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{PrimaryStore, StoreError};

use super::{EngineState, SearchSync};

impl SearchSync {
    /// Start the engine.
    ///
    /// Startup flow:
    /// 1. Connect the primary store (SQL if configured, otherwise in-memory).
    ///    A store that cannot be reached fails startup.
    /// 2. Connect RediSearch if configured, behind a circuit breaker.
    ///    An unreachable index only degrades search: the gateway keeps
    ///    trying on later calls, so propagation and reindex resume once
    ///    Redis answers.
    /// 3. Ensure an index namespace for every registered type.
    /// 4. Start propagation in the configured mode.
    #[tracing::instrument(skip(self), fields(has_sql, has_index))]
    pub async fn start(&mut self) -> Result<(), StoreError> {
        let startup_start = Instant::now();
        info!("Starting search-sync...");
        self.set_state(EngineState::Connecting);

        // ========== PHASE 1: Primary store (ground truth) ==========
        let phase_start = Instant::now();
        if self.store.is_none() {
            let store: Arc<dyn PrimaryStore> = match self.config.sql_url.clone() {
                Some(sql_url) => {
                    info!(url = %sql_url, "Connecting to SQL store...");
                    match SqlStore::new(&sql_url).await {
                        Ok(store) => {
                            metrics::set_backend_healthy("sql", true);
                            tracing::Span::current().record("has_sql", true);
                            Arc::new(store)
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to connect to SQL, required for startup");
                            metrics::set_backend_healthy("sql", false);
                            metrics::record_connection_error("sql");
                            return Err(e);
                        }
                    }
                }
                None => {
                    warn!("No SQL URL configured, rows are kept in memory only");
                    tracing::Span::current().record("has_sql", false);
                    Arc::new(InMemoryStore::new())
                }
            };
            self.store = Some(store);
        }
        metrics::record_startup_phase("store_connect", phase_start.elapsed());

        // ========== PHASE 2: Index service ==========
        let phase_start = Instant::now();
        if self.index.is_none() {
            if let Some(redis_url) = self.config.redis_url.clone() {
                info!(url = %redis_url, "Connecting to RediSearch...");
                let prefix = self.config.redis_prefix.as_deref();
                let retries = self.config.index_retries;
                let connected = match RediSearchIndex::connect(&redis_url, prefix, retries).await {
                    Ok(index) => Ok(index),
                    Err(IndexError::Unavailable(e)) => {
                        warn!(error = %e, "RediSearch unreachable, search degraded until it answers");
                        metrics::set_backend_healthy("redis", false);
                        RediSearchIndex::lazy(&redis_url, prefix, retries)
                    }
                    Err(e) => Err(e),
                };
                match connected {
                    Ok(index) => {
                        let guarded: Arc<dyn IndexGateway> =
                            Arc::new(CircuitIndex::new(Arc::new(index), self.config.circuit()));
                        self.index = Some(guarded);
                    }
                    Err(e) => {
                        error!(error = %e, "RediSearch misconfigured, search unavailable");
                        metrics::set_backend_healthy("redis", false);
                    }
                }
            } else {
                info!("No Redis URL configured, search disabled");
            }
        }
        tracing::Span::current().record("has_index", self.index.is_some());
        metrics::record_startup_phase("index_connect", phase_start.elapsed());

        // ========== PHASE 3: Namespaces ==========
        if let Some(index) = self.index.clone() {
            let phase_start = Instant::now();
            self.set_state(EngineState::Provisioning);
            for indexable in self.registry.all() {
                if let Err(e) = index.ensure_namespace(indexable).await {
                    warn!(kind = %indexable.name, error = %e, "Could not provision index namespace");
                }
            }
            metrics::record_startup_phase("provision", phase_start.elapsed());
        }

        // ========== PHASE 4: Propagation ==========
        self.propagator = CommitPropagator::for_mode(self.config.propagation, self.index.clone());

        self.set_state(EngineState::Ready);
        metrics::record_startup_total(startup_start.elapsed());
        info!(
            types = self.registry.len(),
            search = self.index.is_some(),
            mode = ?self.config.propagation,
            "search-sync ready"
        );
        Ok(())
    }

    /// Drain pending propagation and stop the worker.
    pub async fn shutdown(&self) {
        info!("Shutting down search-sync...");
        self.set_state(EngineState::ShuttingDown);
        self.propagator.shutdown().await;
        info!("search-sync shutdown complete");
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        metrics::set_engine_state(&state.to_string());
    }
}
