//! Resilience primitives for talking to the index service.

pub mod circuit_breaker;
pub mod retry;
