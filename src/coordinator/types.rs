//! Public types for the search-sync coordinator.

use serde::Serialize;
use thiserror::Error;

use crate::entity::Entity;
use crate::pagination::Paginated;
use crate::propagation::PropagationReport;
use crate::storage::traits::StoreError;

/// Engine lifecycle state.
///
/// Use [`super::SearchSync::state()`] to check current state or
/// [`super::SearchSync::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Connecting to the store and the index
    Connecting,
    /// Provisioning index namespaces
    Provisioning,
    /// Accepting units of work and searches
    Ready,
    /// Draining propagation before stopping
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Where a search answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// The index answered
    Index,
    /// The index is configured but could not answer; results are empty
    Unavailable,
    /// No index is configured; results are always empty
    Disabled,
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// A page of search results plus where they came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    #[serde(flatten)]
    pub results: Paginated<Entity>,
    pub source: SearchSource,
}

impl SearchResponse {
    /// Results are empty because the index could not be used.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.source != SearchSource::Index
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("type '{0}' is not indexable")]
    UnknownType(String),
    /// Hydrating index hits from the store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of committing a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Store writes applied
    pub writes: usize,
    /// Index upserts in the change set
    pub upserts: usize,
    /// Index removals in the change set
    pub deletes: usize,
    /// Present when propagation ran inline
    pub propagation: Option<PropagationReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
    }

    #[test]
    fn test_degraded_sources() {
        let response = |source| SearchResponse { results: Paginated::empty(10, 1), source };

        assert!(!response(SearchSource::Index).is_degraded());
        assert!(response(SearchSource::Unavailable).is_degraded());
        assert!(response(SearchSource::Disabled).is_degraded());
    }

    #[test]
    fn test_response_serializes_with_listing_shape() {
        let response = SearchResponse { results: Paginated::empty(10, 1), source: SearchSource::Disabled };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["source"], "disabled");
        assert_eq!(value["_meta"]["per_page"], 10);
        assert!(value["items"].as_array().unwrap().is_empty());
    }
}
