//! Circuit-protected index gateway.
//!
//! While the circuit is open calls fail fast with [`IndexError::Unavailable`],
//! so commits and searches stop waiting on a dead index service. Only
//! `Unavailable` errors count against the circuit.

use async_trait::async_trait;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::registry::{FieldSnapshot, IndexableType};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use super::traits::{IndexError, IndexGateway, IndexHit};

pub struct CircuitIndex {
    inner: Arc<dyn IndexGateway>,
    breaker: CircuitBreaker,
}

impl CircuitIndex {
    pub fn new(inner: Arc<dyn IndexGateway>, config: CircuitConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("index", config),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

fn unwrap_circuit(err: CircuitError<IndexError>) -> IndexError {
    match err {
        CircuitError::Rejected => IndexError::Unavailable("index circuit open".into()),
        CircuitError::Inner(e) => e,
    }
}

#[async_trait]
impl IndexGateway for CircuitIndex {
    async fn upsert(&self, kind: &str, id: EntityId, fields: &FieldSnapshot) -> Result<(), IndexError> {
        self.breaker
            .call_if(IndexError::is_unavailable, || self.inner.upsert(kind, id, fields))
            .await
            .map_err(unwrap_circuit)
    }

    async fn remove(&self, kind: &str, id: EntityId) -> Result<(), IndexError> {
        self.breaker
            .call_if(IndexError::is_unavailable, || self.inner.remove(kind, id))
            .await
            .map_err(unwrap_circuit)
    }

    async fn query(
        &self,
        kind: &str,
        expression: &str,
        page: u32,
        per_page: u32,
    ) -> Result<IndexHit, IndexError> {
        self.breaker
            .call_if(IndexError::is_unavailable, || self.inner.query(kind, expression, page, per_page))
            .await
            .map_err(unwrap_circuit)
    }

    async fn ensure_namespace(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        self.breaker
            .call_if(IndexError::is_unavailable, || self.inner.ensure_namespace(indexable))
            .await
            .map_err(unwrap_circuit)
    }

    async fn clear(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        self.breaker
            .call_if(IndexError::is_unavailable, || self.inner.clear(indexable))
            .await
            .map_err(unwrap_circuit)
    }
}
