use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live counters for adaptive runs, shareable across calls
#[derive(Debug, Default)]
pub struct RunMetrics {
    runs_started: AtomicU64,
    runs_aborted: AtomicU64,
    batches_completed: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    concurrency_increases: AtomicU64,
    concurrency_decreases: AtomicU64,
    peak_concurrency: AtomicUsize,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_aborted(&self) {
        self.runs_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed batch and how it went
    pub fn record_batch(&self, concurrency: usize, succeeded: usize, failed: usize) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.items_succeeded.fetch_add(succeeded as u64, Ordering::Relaxed);
        self.items_failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.peak_concurrency.fetch_max(concurrency, Ordering::Relaxed);
    }

    /// Record a concurrency change between two batches
    pub fn record_adjustment(&self, from: usize, to: usize) {
        if to > from {
            self.concurrency_increases.fetch_add(1, Ordering::Relaxed);
        } else if to < from {
            self.concurrency_decreases.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed.load(Ordering::Relaxed)
    }

    pub fn items_succeeded(&self) -> u64 {
        self.items_succeeded.load(Ordering::Relaxed)
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::Relaxed)
    }

    /// Collect current snapshot of all counters
    pub fn snapshot(&self) -> RunMetricsSnapshot {
        RunMetricsSnapshot {
            timestamp: Utc::now(),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_aborted: self.runs_aborted.load(Ordering::Relaxed),
            batches_completed: self.batches_completed(),
            items_succeeded: self.items_succeeded(),
            items_failed: self.items_failed(),
            concurrency_increases: self.concurrency_increases.load(Ordering::Relaxed),
            concurrency_decreases: self.concurrency_decreases.load(Ordering::Relaxed),
            peak_concurrency: self.peak_concurrency(),
        }
    }
}

/// Snapshot of run counters at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub runs_started: u64,
    pub runs_aborted: u64,
    pub batches_completed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub concurrency_increases: u64,
    pub concurrency_decreases: u64,
    pub peak_concurrency: usize,
}

impl RunMetricsSnapshot {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.items_succeeded + self.items_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.items_succeeded as f64 / total_processed as f64) * 100.0
        }
    }

    pub fn items_processed(&self) -> u64 {
        self.items_succeeded + self.items_failed
    }
}
