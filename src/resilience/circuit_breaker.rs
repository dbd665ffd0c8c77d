// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for the index service, built on recloser.
//!
//! ```text
//!   Closed ──(half the window failed)──► Open ──(recovery_timeout)──► HalfOpen
//!     ▲                                                                 │
//!     └──────────────(success_threshold trial calls pass)───────────────┘
//! ```
//!
//! Only failures the caller classifies as outages move the breaker. A
//! malformed query or a missing namespace is returned to the caller and
//! counted as `ignored`, leaving the circuit where it was.

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics;

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// Open circuit, the call was never made
    #[error("circuit open, call rejected")]
    Rejected,
    #[error(transparent)]
    Inner(E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Calls observed while closed; the circuit opens once half of them failed
    pub failure_threshold: u32,
    /// Trial calls allowed while half-open
    pub success_threshold: u32,
    /// Time spent open before trial calls are let through
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(15),
        }
    }
}

impl CircuitConfig {
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// Counters since the breaker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitStats {
    pub passed: u64,
    /// Outages, counted against the circuit
    pub failed: u64,
    /// Errors returned without touching the circuit
    pub ignored: u64,
    /// Calls refused while open
    pub rejected: u64,
}

impl CircuitStats {
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.passed + self.failed + self.ignored + self.rejected
    }

    /// Share of attempted calls that failed with an outage
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let attempted = self.passed + self.failed + self.ignored;
        if attempted == 0 {
            0.0
        } else {
            self.failed as f64 / attempted as f64
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    recloser: AsyncRecloser,
    passed: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(0.5)
            .closed_len(config.failure_threshold.max(1) as usize)
            .half_open_len(config.success_threshold.max(1) as usize)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            recloser: recloser.into(),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` through the breaker; only errors matching `trips` count as outages.
    pub async fn call_if<P, F, Fut, T, E>(&self, trips: P, f: F) -> Result<T, CircuitError<E>>
    where
        P: Fn(&E) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = self.recloser.call_with(|e: &E| trips(e), f()).await;
        let (counter, label) = match &outcome {
            Ok(_) => (&self.passed, "success"),
            Err(RecloserError::Rejected) => {
                warn!(circuit = %self.name, "Circuit open, call rejected");
                (&self.rejected, "rejected")
            }
            Err(RecloserError::Inner(e)) if trips(e) => {
                debug!(circuit = %self.name, "Call failed, counted against circuit");
                (&self.failed, "failure")
            }
            Err(RecloserError::Inner(_)) => (&self.ignored, "ignored"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_call(&self.name, label);
        outcome.map_err(CircuitError::from)
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Timeout,
        BadQuery,
    }

    fn is_outage(e: &Failure) -> bool {
        *e == Failure::Timeout
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let cb = CircuitBreaker::new("index", CircuitConfig::default());

        let result: Result<u64, CircuitError<Failure>> = cb.call_if(is_outage, || async { Ok(42) }).await;

        assert!(matches!(result, Ok(42)));
        assert_eq!(cb.stats(), CircuitStats { passed: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn test_outages_open_the_circuit() {
        let cb = CircuitBreaker::new(
            "index",
            CircuitConfig { recovery_timeout: Duration::from_secs(60), ..CircuitConfig::test() },
        );

        for _ in 0..5 {
            let _: Result<(), _> = cb.call_if(is_outage, || async { Err(Failure::Timeout) }).await;
        }

        let stats = cb.stats();
        assert!(stats.failed >= 2);
        assert!(stats.rejected >= 1);
        assert_eq!(stats.calls(), 5);
    }

    #[tokio::test]
    async fn test_ignored_errors_keep_circuit_closed() {
        let cb = CircuitBreaker::new("index", CircuitConfig::test());

        for _ in 0..6 {
            let result: Result<(), _> = cb.call_if(is_outage, || async { Err(Failure::BadQuery) }).await;
            assert!(matches!(result, Err(CircuitError::Inner(Failure::BadQuery))));
        }

        let stats = cb.stats();
        assert_eq!(stats.ignored, 6);
        assert_eq!(stats.rejected, 0);
        assert_eq!(stats.failure_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_recovers_after_timeout() {
        let cb = CircuitBreaker::new("index", CircuitConfig::test());
        for _ in 0..4 {
            let _: Result<(), _> = cb.call_if(is_outage, || async { Err(Failure::Timeout) }).await;
        }
        assert!(cb.stats().rejected >= 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let result: Result<u8, CircuitError<Failure>> = cb.call_if(is_outage, || async { Ok(1) }).await;

        assert!(matches!(result, Ok(1)));
    }

    #[test]
    fn test_failure_rate_excludes_rejections() {
        let stats = CircuitStats { passed: 2, failed: 2, ignored: 0, rejected: 10 };
        assert!((stats.failure_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.calls(), 14);
    }
}
