//! Partition lock manager
//!
//! Row-level exclusive (write) and shared (read) locks. Each row that is
//! currently locked has its own entry with a mutex and condvar, so waiters
//! on different rows never contend on a common lock. Entries are created on
//! first use and removed again once nobody holds or waits on them.
//!
//! Holds are reentrant per transaction. A transaction that is the only
//! shared holder of a row may take the exclusive lock on top of it.
//!
//! Acquisition never retries on its own: a timed-out caller gets
//! `LockTimeout` and decides at a higher level what to do.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use snapkv_core::{RowKey, SiError, SiResult, TxnId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default bound on how long an acquisition waits
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders, excludes writers
    Shared,
    /// Single holder
    Exclusive,
}

/// Snapshot of lock table occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// (row, holder) pairs currently granted
    pub held_locks: usize,
    /// Callers blocked in an acquisition
    pub waiting_callers: usize,
}

#[derive(Default)]
struct LockState {
    exclusive: Option<(TxnId, u32)>,
    shared: SmallVec<[(TxnId, u32); 4]>,
    waiters: usize,
    /// Set once the entry has been unlinked from the table
    retired: bool,
}

impl LockState {
    fn grantable(&self, txn: TxnId, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |(holder, _)| holder == txn);
        match mode {
            LockMode::Shared => exclusive_ok,
            LockMode::Exclusive => exclusive_ok && self.shared.iter().all(|(h, _)| *h == txn),
        }
    }

    fn grant(&mut self, txn: TxnId, mode: LockMode) {
        match mode {
            LockMode::Exclusive => match &mut self.exclusive {
                Some((_, count)) => *count += 1,
                None => self.exclusive = Some((txn, 1)),
            },
            LockMode::Shared => match self.shared.iter_mut().find(|(h, _)| *h == txn) {
                Some((_, count)) => *count += 1,
                None => self.shared.push((txn, 1)),
            },
        }
    }

    /// Drop one hold; returns false if `txn` held nothing in `mode`
    fn release_one(&mut self, txn: TxnId, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => match self.exclusive {
                Some((holder, count)) if holder == txn => {
                    self.exclusive = if count > 1 { Some((holder, count - 1)) } else { None };
                    true
                }
                _ => false,
            },
            LockMode::Shared => match self.shared.iter().position(|(h, _)| *h == txn) {
                Some(i) => {
                    if self.shared[i].1 > 1 {
                        self.shared[i].1 -= 1;
                    } else {
                        self.shared.swap_remove(i);
                    }
                    true
                }
                None => false,
            },
        }
    }

    fn release_txn(&mut self, txn: TxnId) -> bool {
        let mut released = false;
        if matches!(self.exclusive, Some((holder, _)) if holder == txn) {
            self.exclusive = None;
            released = true;
        }
        let before = self.shared.len();
        self.shared.retain(|(h, _)| *h != txn);
        released || self.shared.len() != before
    }

    fn holds(&self, txn: TxnId) -> bool {
        matches!(self.exclusive, Some((holder, _)) if holder == txn)
            || self.shared.iter().any(|(h, _)| *h == txn)
    }

    fn is_idle(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty() && self.waiters == 0
    }

    fn holder_count(&self) -> usize {
        self.exclusive.iter().count() + self.shared.len()
    }
}

#[derive(Default)]
struct RowLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

/// Per-partition row lock table
pub struct LockManager {
    table: DashMap<RowKey, Arc<RowLock>>,
    /// Rows each transaction holds something on, for `release_all`
    held: DashMap<TxnId, FxHashSet<RowKey>>,
    timeout: Duration,
    waiting: AtomicUsize,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl LockManager {
    /// Lock manager whose acquisitions wait at most `timeout`
    pub fn new(timeout: Duration) -> Self {
        LockManager {
            table: DashMap::new(),
            held: DashMap::new(),
            timeout,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Configured wait bound
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the exclusive lock on `row` for `txn`
    ///
    /// Blocks while another transaction holds the row in any mode.
    pub fn acquire_exclusive_write_lock(&self, row: &RowKey, txn: TxnId) -> SiResult<()> {
        self.acquire(row, txn, LockMode::Exclusive)
    }

    /// Acquire a shared lock on `row` for `txn`
    ///
    /// Blocks only while another transaction holds the row exclusively.
    pub fn acquire_shared_read_lock(&self, row: &RowKey, txn: TxnId) -> SiResult<()> {
        self.acquire(row, txn, LockMode::Shared)
    }

    /// Release one exclusive hold
    pub fn release_exclusive_write_lock(&self, row: &RowKey, txn: TxnId) -> bool {
        self.release(row, txn, LockMode::Exclusive)
    }

    /// Release one shared hold
    pub fn release_shared_read_lock(&self, row: &RowKey, txn: TxnId) -> bool {
        self.release(row, txn, LockMode::Shared)
    }

    /// Release every hold of `txn`; returns the number of rows released
    pub fn release_all(&self, txn: TxnId) -> usize {
        let rows = match self.held.remove(&txn) {
            Some((_, rows)) => rows,
            None => return 0,
        };
        let mut released = 0;
        for row in rows {
            let Some(entry) = self.entry(&row) else {
                continue;
            };
            let mut state = entry.state.lock();
            if state.release_txn(txn) {
                released += 1;
                entry.cond.notify_all();
            }
            self.retire_if_idle(&row, &entry, &mut state);
        }
        if released > 0 {
            debug!(target: "snapkv::lock", txn = %txn, rows = released, "Released all locks");
        }
        released
    }

    /// Current occupancy
    pub fn stats(&self) -> LockStats {
        // Clone entries out first; locking a row while holding a shard guard
        // would invert the order used by retirement
        let entries: Vec<Arc<RowLock>> = self.table.iter().map(|e| Arc::clone(e.value())).collect();
        let held_locks = entries
            .iter()
            .map(|entry| entry.state.lock().holder_count())
            .sum();
        LockStats {
            held_locks,
            waiting_callers: self.waiting.load(Ordering::SeqCst),
        }
    }

    /// Whether `txn` holds anything on `row`
    pub fn is_held_by(&self, row: &RowKey, txn: TxnId) -> bool {
        self.entry(row)
            .map_or(false, |entry| entry.state.lock().holds(txn))
    }

    /// Number of rows with a live lock entry
    pub fn locked_rows(&self) -> usize {
        self.table.len()
    }

    fn entry(&self, row: &RowKey) -> Option<Arc<RowLock>> {
        self.table.get(row).map(|e| Arc::clone(e.value()))
    }

    fn acquire(&self, row: &RowKey, txn: TxnId, mode: LockMode) -> SiResult<()> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            let entry = Arc::clone(self.table.entry(row.clone()).or_default().value());
            let mut state = entry.state.lock();
            if state.retired {
                // Lost a race with removal; the next lookup makes a fresh entry
                continue;
            }

            while !state.grantable(txn, mode) {
                state.waiters += 1;
                self.waiting.fetch_add(1, Ordering::SeqCst);
                let timed_out = entry.cond.wait_until(&mut state, deadline).timed_out();
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                state.waiters -= 1;

                if timed_out && !state.grantable(txn, mode) {
                    self.retire_if_idle(row, &entry, &mut state);
                    debug!(
                        target: "snapkv::lock",
                        txn = %txn,
                        row = %row,
                        mode = ?mode,
                        "Lock acquisition timed out"
                    );
                    return Err(SiError::LockTimeout {
                        row: row.clone(),
                        txn,
                        waited: started.elapsed(),
                    });
                }
            }

            state.grant(txn, mode);
            drop(state);
            self.held.entry(txn).or_default().insert(row.clone());
            return Ok(());
        }
    }

    fn release(&self, row: &RowKey, txn: TxnId, mode: LockMode) -> bool {
        let Some(entry) = self.entry(row) else {
            return false;
        };
        let mut state = entry.state.lock();
        if !state.release_one(txn, mode) {
            return false;
        }
        entry.cond.notify_all();
        if !state.holds(txn) {
            if let Some(mut rows) = self.held.get_mut(&txn) {
                rows.remove(row);
            }
        }
        self.retire_if_idle(row, &entry, &mut state);
        true
    }

    /// Unlink an entry nobody holds or waits on
    ///
    /// The entry is marked retired under its own mutex first, so an acquirer
    /// that already cloned it will go back to the table instead of granting
    /// a lock on an unlinked entry.
    fn retire_if_idle(
        &self,
        row: &RowKey,
        entry: &Arc<RowLock>,
        state: &mut parking_lot::MutexGuard<'_, LockState>,
    ) {
        if state.retired || !state.is_idle() {
            return;
        }
        state.retired = true;
        self.table.remove_if(row, |_, current| Arc::ptr_eq(current, entry));
    }
}
