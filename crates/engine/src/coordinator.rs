//! Transaction lifecycle counters
//!
//! Purely observational; all counters use `Relaxed` ordering.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct TransactionCounters {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    killed: AtomicU64,
    reaped: AtomicU64,
}

impl TransactionCounters {
    pub(crate) fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_kill(&self, n: u64) {
        self.killed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_reap(&self, n: u64) {
        self.reaped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransactionMetrics {
        TransactionMetrics {
            total_started: self.started.load(Ordering::Relaxed),
            total_committed: self.committed.load(Ordering::Relaxed),
            total_rolled_back: self.rolled_back.load(Ordering::Relaxed),
            total_killed: self.killed.load(Ordering::Relaxed),
            total_reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

/// Transaction metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions begun
    pub total_started: u64,
    /// Transactions committed
    pub total_committed: u64,
    /// Explicit rollbacks
    pub total_rolled_back: u64,
    /// Rolled back through kill or kill_stale
    pub total_killed: u64,
    /// Rolled back by the keep-alive reaper
    pub total_reaped: u64,
}

impl TransactionMetrics {
    /// Fraction of finished transactions that committed
    pub fn commit_rate(&self) -> f64 {
        let finished = self.total_committed
            + self.total_rolled_back
            + self.total_killed
            + self.total_reaped;
        if finished == 0 {
            0.0
        } else {
            self.total_committed as f64 / finished as f64
        }
    }
}
