//! Partition request counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct PartitionCounters {
    pub(crate) reads: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) scans: AtomicU64,
    pub(crate) write_conflicts: AtomicU64,
    pub(crate) lock_timeouts: AtomicU64,
    pub(crate) log_failures: AtomicU64,
    pub(crate) applied: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

impl PartitionCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PartitionMetrics {
        PartitionMetrics {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Partition metrics
///
/// Cumulative since the partition was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMetrics {
    /// Point reads served
    pub reads: u64,
    /// Writes accepted
    pub writes: u64,
    /// Scanners opened
    pub scans: u64,
    /// Writes rejected with `WriteConflict`
    pub write_conflicts: u64,
    /// Lock acquisitions that timed out
    pub lock_timeouts: u64,
    /// Log appends that failed
    pub log_failures: u64,
    /// Transactions whose buffers were applied
    pub applied: u64,
    /// Transactions whose buffers were discarded
    pub discarded: u64,
}

impl PartitionMetrics {
    /// Share of write attempts rejected by conflicts or lock timeouts
    pub fn contention_rate(&self) -> f64 {
        let attempts = self.writes + self.write_conflicts + self.lock_timeouts;
        if attempts > 0 {
            (self.write_conflicts + self.lock_timeouts) as f64 / attempts as f64
        } else {
            0.0
        }
    }
}
