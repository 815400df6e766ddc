//! Augmenter metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Augmenter metrics.
#[derive(Debug, Default)]
pub struct AugmenterMetrics {
    /// Debounced mutation batches handled.
    pub batches: AtomicU64,

    /// Reconciliation passes completed, successful or not.
    pub reconciliations: AtomicU64,

    /// Controls created.
    pub attached: AtomicU64,

    /// Unbound controls found in place and given a binding.
    pub adopted: AtomicU64,

    /// Blocks whose controls were removed.
    pub detached: AtomicU64,

    /// Reconciliation passes that failed every retry attempt.
    pub failures: AtomicU64,

    /// Selection sequences completed.
    pub selections: AtomicU64,

    /// Removed blocks whose tasks and binding were torn down.
    pub teardowns: AtomicU64,

    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl AugmenterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the augmenter.
    pub fn mark_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attached(&self) {
        self.attached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_adopted(&self) {
        self.adopted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detached(&self) {
        self.detached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_selection(&self) {
        self.selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            batches: self.batches.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            attached: self.attached.load(Ordering::Relaxed),
            adopted: self.adopted.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            selections: self.selections.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub batches: u64,
    pub reconciliations: u64,
    pub attached: u64,
    pub adopted: u64,
    pub detached: u64,
    pub failures: u64,
    pub selections: u64,
    pub teardowns: u64,
}

impl MetricsSnapshot {
    /// Share of reconciliation passes that ended in a final failure.
    pub fn failure_rate(&self) -> f64 {
        if self.reconciliations == 0 {
            return 0.0;
        }
        self.failures as f64 / self.reconciliations as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = AugmenterMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(metrics.uptime_secs(), 0);
    }

    #[test]
    fn test_record_counters() {
        let metrics = AugmenterMetrics::new();
        metrics.record_batch();
        metrics.record_reconciliation();
        metrics.record_reconciliation();
        metrics.record_attached();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches, 1);
        assert_eq!(snapshot.reconciliations, 2);
        assert_eq!(snapshot.attached, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.detached, 0);
    }

    #[test]
    fn test_failure_rate() {
        let snapshot = MetricsSnapshot {
            reconciliations: 4,
            failures: 1,
            ..Default::default()
        };
        assert_eq!(snapshot.failure_rate(), 0.25);
        assert_eq!(MetricsSnapshot::default().failure_rate(), 0.0);
    }
}
