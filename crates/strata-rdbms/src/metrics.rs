//! Table adapter metrics.
//!
//! [`RdbmsTableMetrics`] provides lock-free atomic counters for tracking
//! operation statistics of one adapter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one relational table adapter.
#[derive(Debug, Default)]
pub struct RdbmsTableMetrics {
    /// Rows inserted (single and batch).
    pub rows_inserted: AtomicU64,
    /// Rows updated, including the update half of upserts.
    pub rows_updated: AtomicU64,
    /// Rows deleted.
    pub rows_deleted: AtomicU64,
    /// Rows returned by cursors.
    pub rows_read: AtomicU64,
    /// `find` calls.
    pub finds: AtomicU64,
    /// `contains` calls.
    pub contains_checks: AtomicU64,
    /// Upserts that ended in an insert.
    pub upsert_inserts: AtomicU64,
    /// Retries after transient failures.
    pub retries: AtomicU64,
    /// Operations that failed.
    pub errors_total: AtomicU64,
    /// Condition compilations served from the cache.
    pub condition_cache_hits: AtomicU64,
}

/// Point-in-time copy of [`RdbmsTableMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Rows inserted.
    pub rows_inserted: u64,
    /// Rows updated.
    pub rows_updated: u64,
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Rows read.
    pub rows_read: u64,
    /// `find` calls.
    pub finds: u64,
    /// `contains` calls.
    pub contains_checks: u64,
    /// Upserts that inserted.
    pub upsert_inserts: u64,
    /// Retries.
    pub retries: u64,
    /// Failed operations.
    pub errors_total: u64,
    /// Condition cache hits.
    pub condition_cache_hits: u64,
}

impl RdbmsTableMetrics {
    /// Creates a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records inserted rows.
    pub fn record_insert(&self, rows: u64) {
        self.rows_inserted.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records updated rows.
    pub fn record_update(&self, rows: u64) {
        self.rows_updated.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records deleted rows.
    pub fn record_delete(&self, rows: u64) {
        self.rows_deleted.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records rows handed out by a cursor.
    pub fn record_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    /// Records a `find` call.
    pub fn record_find(&self) {
        self.finds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a `contains` call.
    pub fn record_contains(&self) {
        self.contains_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an upsert that inserted.
    pub fn record_upsert_insert(&self) {
        self.upsert_inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed operation.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a condition cache hit.
    pub fn record_cache_hit(&self) {
        self.condition_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_updated: self.rows_updated.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            finds: self.finds.load(Ordering::Relaxed),
            contains_checks: self.contains_checks.load(Ordering::Relaxed),
            upsert_inserts: self.upsert_inserts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            condition_cache_hits: self.condition_cache_hits.load(Ordering::Relaxed),
        }
    }
}
