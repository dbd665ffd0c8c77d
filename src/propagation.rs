// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Commit Propagator
//!
//! Turns the change set of a committed unit of work into index calls:
//! `Upserted` records become `upsert`, `Deleted` records become `remove`.
//!
//! Propagation is best-effort. A failed record is logged and counted, the
//! remaining records still go out, and the committed store write is never
//! reopened. The full rebuild is the recovery path for anything dropped.
//!
//! # Modes
//!
//! ```text
//! Inline:      commit ──► apply ──► report returned to the committer
//!
//! Background:  commit ──► queue ──► single worker ──► apply
//!                           ▲
//!                  flush() waits for everything queued before it
//! ```
//!
//! The background worker consumes change sets strictly in submission order,
//! so index mutations for one entity follow the order of their commits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::change_set::{ChangeSet, Disposition};
use crate::index::IndexGateway;
use crate::metrics;

/// When change sets are pushed to the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationMode {
    /// Queue for a single ordered worker; the committer never waits on the index
    #[default]
    Background,
    /// Apply right after commit and hand the report back.
    ///
    /// The engine's commit-order lock is held until every index call of the
    /// change set has returned, so index latency serializes all concurrent
    /// commits, not only their index traffic.
    Inline,
}

/// Outcome of pushing one change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub upserted: usize,
    pub removed: usize,
    pub failed: usize,
}

impl PropagationReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.upserted + self.removed + self.failed
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Push every record of a change set, one attempt each.
pub async fn apply(gateway: &dyn IndexGateway, change_set: ChangeSet) -> PropagationReport {
    let start = Instant::now();
    let mut report = PropagationReport::default();
    metrics::record_change_set_size(change_set.len());

    for record in change_set {
        let disposition = record.disposition.as_str();
        let result = match &record.disposition {
            Disposition::Upserted(fields) => gateway.upsert(&record.kind, record.id, fields).await,
            Disposition::Deleted => gateway.remove(&record.kind, record.id).await,
        };

        match result {
            Ok(()) => {
                match record.disposition {
                    Disposition::Upserted(_) => report.upserted += 1,
                    Disposition::Deleted => report.removed += 1,
                }
                metrics::record_propagation(&record.kind, disposition, "success");
            }
            Err(e) => {
                report.failed += 1;
                metrics::record_propagation(&record.kind, disposition, "failure");
                warn!(
                    kind = %record.kind,
                    id = record.id,
                    disposition,
                    error = %e,
                    "Index propagation failed, record dropped"
                );
            }
        }
    }

    metrics::record_propagation_duration(start.elapsed());
    report
}

enum Job {
    Apply(ChangeSet),
    Flush(oneshot::Sender<()>),
}

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

enum Target {
    /// Search is not configured; change sets are dropped
    Disabled,
    Inline(Arc<dyn IndexGateway>),
    Background {
        worker: Mutex<Option<Worker>>,
        pending: Arc<AtomicUsize>,
    },
}

pub struct CommitPropagator {
    target: Target,
}

impl CommitPropagator {
    /// Propagator with nowhere to send changes.
    #[must_use]
    pub fn disabled() -> Self {
        Self { target: Target::Disabled }
    }

    #[must_use]
    pub fn inline(gateway: Arc<dyn IndexGateway>) -> Self {
        Self { target: Target::Inline(gateway) }
    }

    /// Spawn the ordered worker. Must be called from within a tokio runtime.
    #[must_use]
    pub fn background(gateway: Arc<dyn IndexGateway>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Apply(change_set) => {
                        let report = apply(gateway.as_ref(), change_set).await;
                        let depth = worker_pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                        metrics::set_propagation_queue_depth(depth);
                        debug!(
                            upserted = report.upserted,
                            removed = report.removed,
                            failed = report.failed,
                            "Change set propagated"
                        );
                    }
                    Job::Flush(done) => {
                        // Caller may have given up waiting
                        let _ = done.send(());
                    }
                }
            }
            debug!("Propagation worker stopped");
        });

        Self {
            target: Target::Background {
                worker: Mutex::new(Some(Worker { tx, task })),
                pending,
            },
        }
    }

    /// Build the propagator for a mode, or a disabled one without a gateway.
    #[must_use]
    pub fn for_mode(mode: PropagationMode, gateway: Option<Arc<dyn IndexGateway>>) -> Self {
        match (gateway, mode) {
            (None, _) => Self::disabled(),
            (Some(gateway), PropagationMode::Inline) => Self::inline(gateway),
            (Some(gateway), PropagationMode::Background) => Self::background(gateway),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.target, Target::Disabled)
    }

    /// Hand over the change set of a committed unit of work.
    ///
    /// Returns the report in inline mode. Background submissions return
    /// `None` once queued.
    pub async fn submit(&self, change_set: ChangeSet) -> Option<PropagationReport> {
        match &self.target {
            Target::Disabled => {
                if !change_set.is_empty() {
                    debug!(records = change_set.len(), "Search disabled, change set dropped");
                }
                None
            }
            Target::Inline(gateway) => {
                if change_set.is_empty() {
                    return Some(PropagationReport::default());
                }
                Some(apply(gateway.as_ref(), change_set).await)
            }
            Target::Background { worker, pending } => {
                if change_set.is_empty() {
                    return None;
                }
                let records = change_set.len();
                let guard = worker.lock();
                let Some(worker) = guard.as_ref() else {
                    warn!(records, "Propagation worker stopped, change set dropped");
                    return None;
                };
                let depth = pending.fetch_add(1, Ordering::SeqCst) + 1;
                if worker.tx.send(Job::Apply(change_set)).is_err() {
                    pending.fetch_sub(1, Ordering::SeqCst);
                    warn!(records, "Propagation worker gone, change set dropped");
                    return None;
                }
                metrics::set_propagation_queue_depth(depth);
                None
            }
        }
    }

    /// Wait until every change set submitted before this call has been applied.
    pub async fn flush(&self) {
        let Target::Background { worker, .. } = &self.target else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        let sent = worker
            .lock()
            .as_ref()
            .is_some_and(|w| w.tx.send(Job::Flush(done_tx)).is_ok());
        if sent {
            // Worker dropping the sender means it stopped; nothing left to wait for
            let _ = done_rx.await;
        }
    }

    /// Drain queued change sets and stop the worker.
    pub async fn shutdown(&self) {
        let Target::Background { worker, .. } = &self.target else {
            return;
        };
        let taken = worker.lock().take();
        let Some(Worker { tx, task }) = taken else {
            return;
        };
        // Closing the channel lets the worker finish what is queued, then exit
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "Propagation worker ended abnormally");
        }
        info!("Propagation worker drained");
    }

    /// Change sets queued but not yet applied
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.target {
            Target::Background { pending, .. } => pending.load(Ordering::SeqCst),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::{ChangeRecord, ChangeSet};
    use crate::index::{InMemoryIndex, IndexOp};
    use crate::registry::FieldSnapshot;
    use serde_json::json;

    fn snapshot(title: &str) -> FieldSnapshot {
        let mut fields = FieldSnapshot::new();
        fields.insert("title".into(), json!(title));
        fields
    }

    fn set(records: Vec<ChangeRecord>) -> ChangeSet {
        ChangeSet::from_records(records).unwrap()
    }

    #[tokio::test]
    async fn test_inline_applies_and_reports() {
        let index = Arc::new(InMemoryIndex::new());
        let propagator = CommitPropagator::inline(index.clone());

        let report = propagator
            .submit(set(vec![
                ChangeRecord::upserted("item", 1, snapshot("oak table")),
                ChangeRecord::deleted("item", 2),
            ]))
            .await
            .unwrap();

        assert_eq!(report, PropagationReport { upserted: 1, removed: 1, failed: 0 });
        assert_eq!(index.ids("item"), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_stop_the_rest() {
        let index = Arc::new(InMemoryIndex::new());
        index.fail_on("item", 2);
        let propagator = CommitPropagator::inline(index.clone());

        let report = propagator
            .submit(set(vec![
                ChangeRecord::upserted("item", 1, snapshot("a")),
                ChangeRecord::upserted("item", 2, snapshot("b")),
                ChangeRecord::upserted("item", 3, snapshot("c")),
            ]))
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.upserted, 2);
        assert!(!report.is_clean());
        assert_eq!(index.ids("item"), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_unavailable_index_drops_everything_quietly() {
        let index = Arc::new(InMemoryIndex::new());
        index.set_available(false);
        let propagator = CommitPropagator::inline(index.clone());

        let report = propagator
            .submit(set(vec![ChangeRecord::upserted("item", 1, snapshot("a"))]))
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(index.journal().is_empty());
    }

    #[tokio::test]
    async fn test_background_applies_after_flush() {
        let index = Arc::new(InMemoryIndex::new());
        let propagator = CommitPropagator::background(index.clone());

        assert!(propagator
            .submit(set(vec![ChangeRecord::upserted("item", 1, snapshot("a"))]))
            .await
            .is_none());
        propagator.flush().await;

        assert_eq!(index.ids("item"), vec![1]);
        assert_eq!(propagator.pending(), 0);
    }

    #[tokio::test]
    async fn test_background_preserves_submission_order() {
        let index = Arc::new(InMemoryIndex::new());
        let propagator = CommitPropagator::background(index.clone());

        propagator.submit(set(vec![ChangeRecord::upserted("item", 1, snapshot("v1"))])).await;
        propagator.submit(set(vec![ChangeRecord::deleted("item", 1)])).await;
        propagator.submit(set(vec![ChangeRecord::upserted("item", 1, snapshot("v3"))])).await;
        propagator.flush().await;

        let journal = index.journal();
        assert_eq!(journal.len(), 3);
        assert!(matches!(journal[1], IndexOp::Remove { id: 1, .. }));
        assert_eq!(index.document("item", 1).unwrap()["title"], json!("v3"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let index = Arc::new(InMemoryIndex::new());
        let propagator = CommitPropagator::background(index.clone());

        for id in 1..=20 {
            propagator.submit(set(vec![ChangeRecord::upserted("item", id, snapshot("x"))])).await;
        }
        propagator.shutdown().await;

        assert_eq!(index.ids("item").len(), 20);

        // Submissions after shutdown are dropped, not panics
        propagator.submit(set(vec![ChangeRecord::upserted("item", 99, snapshot("x"))])).await;
        propagator.flush().await;
        assert!(index.document("item", 99).is_none());
    }

    #[tokio::test]
    async fn test_disabled_drops_change_sets() {
        let propagator = CommitPropagator::for_mode(PropagationMode::Inline, None);

        assert!(!propagator.is_enabled());
        let report = propagator
            .submit(set(vec![ChangeRecord::upserted("item", 1, snapshot("a"))]))
            .await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_empty_change_set_makes_no_calls() {
        let index = Arc::new(InMemoryIndex::new());
        let propagator = CommitPropagator::inline(index.clone());

        let report = propagator.submit(ChangeSet::default()).await.unwrap();

        assert_eq!(report.attempted(), 0);
        assert!(index.journal().is_empty());
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        let mode: PropagationMode = serde_json::from_str("\"inline\"").unwrap();
        assert_eq!(mode, PropagationMode::Inline);
        assert_eq!(PropagationMode::default(), PropagationMode::Background);
    }
}
