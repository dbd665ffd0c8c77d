// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Two budgets are used across the crate: [`RetryConfig::startup`] while
//! connecting, and [`RetryConfig::query`] for single store and index calls.
//! [`retry_when`] only retries errors a predicate calls transient, so a
//! rejected query is reported at once instead of being sent again.
//!
//! # Example
//!
//! ```
//! use search_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let query = RetryConfig::query();
//! assert_eq!(query.max_attempts, 3);
//!
//! // Waits between attempts, never more than max_delay
//! let delays: Vec<Duration> = RetryConfig::startup().delays().collect();
//! assert_eq!(delays.len(), 4);
//! assert_eq!(delays[0], Duration::from_millis(200));
//! assert_eq!(delays[3], Duration::from_secs(1) + Duration::from_millis(600));
//!
//! assert_eq!(RetryConfig::query().with_max_attempts(0).max_attempts, 1);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and backoff curve.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Delay multiplier between attempts
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Connection budget: five attempts, about three seconds of waiting.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Per-call budget for index and store operations.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            factor: 2.0,
        }
    }

    /// At least one attempt is always made.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Waits between consecutive attempts, one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let waits = self.max_attempts.saturating_sub(1);
        std::iter::successors(Some(self.initial_delay.min(self.max_delay)), move |d| {
            Some(d.mul_f64(self.factor).min(self.max_delay))
        })
        .take(waits)
    }
}

/// Retry every failure until the budget runs out.
pub async fn retry<F, Fut, T, E>(operation: &str, config: &RetryConfig, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(operation, config, |_: &E| true, op).await
}

/// Retry failures for which `transient` holds; anything else returns at once.
pub async fn retry_when<F, Fut, T, E, P>(
    operation: &str,
    config: &RetryConfig,
    transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delays = config.delays();
    let mut attempt = 1usize;

    loop {
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !transient(&err) {
            return Err(err);
        }
        let Some(delay) = delays.next() else {
            return Err(err);
        };

        warn!(
            operation,
            attempt,
            max_attempts = config.max_attempts,
            error = %err,
            retry_in = ?delay,
            "Transient failure, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
