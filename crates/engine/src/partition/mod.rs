//! Partition coprocessor
//!
//! A partition owns a contiguous key range of one table. It runs every
//! transactional read and write for that range:
//!
//! - writes take the row's exclusive lock, check for write-write conflicts,
//!   append a `WriteBuffered` record to the partition log and only then add
//!   the write to the transaction's buffer; the append and the buffer push
//!   happen while the registry holds the writer ACTIVE
//! - reads merge buffered versions with committed versions from the cell
//!   store and let the visibility engine pick the one the reader sees
//! - once the registry has resolved a transaction, `complete_transaction`
//!   applies its buffer to the cell store (commit) or drops it (rollback)
//!
//! Reads look at the buffers before the cell store and completion applies a
//! buffer before dropping it, so a committed write is always found in at
//! least one of the two.
//!
//! Every request holds the partition gate shared; split and close take it
//! exclusively to drain in-flight requests.

mod buffer;
mod info;
mod metrics;
mod scanner;

pub use buffer::TransactionState;
pub use info::{PartitionInfo, PartitionState, TableKind};
pub use metrics::PartitionMetrics;
pub use scanner::Scanner;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::PartitionCounters;
use parking_lot::{Mutex, RwLock};
use snapkv_concurrency::{
    check_write_conflict, LockManager, LockStats, TimestampSource, TransactionLookup,
    TransactionRegistry, VisibilityContext,
};
use snapkv_core::{
    BufferedWrite, CellVersion, IsolationLevel, PartitionId, RowKey, SiError, SiResult,
    Transaction, TxnId, TxnStatus, WriteOp,
};
use snapkv_durability::{
    check_split_consistency, replay, split_log, LogRecord, LogStore, LogStream, Resolution,
    SplitHalves, SplitSide,
};
use snapkv_storage::CellStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared services a partition runs against
#[derive(Clone)]
pub struct PartitionContext {
    /// Authoritative transaction status
    pub registry: Arc<TransactionRegistry>,
    /// Timestamps for auto-committed writes
    pub oracle: Arc<dyn TimestampSource>,
    /// Where partition logs live
    pub log_store: Arc<dyn LogStore>,
    /// Row lock wait bound
    pub lock_timeout: Duration,
}

/// What `complete_transaction` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Buffer applied to the cell store; number of rows written
    Applied(usize),
    /// Buffer dropped; number of writes discarded
    Discarded(usize),
    /// The transaction had nothing buffered here
    Nothing,
}

/// A key-range shard and its coprocessor
pub struct Partition {
    info: PartitionInfo,
    state: Mutex<PartitionState>,
    gate: RwLock<()>,
    ctx: PartitionContext,
    store: Arc<dyn CellStore>,
    log: Mutex<Box<dyn LogStream>>,
    locks: LockManager,
    txns: DashMap<TxnId, TransactionState>,
    counters: PartitionCounters,
}

impl Partition {
    fn build(
        info: PartitionInfo,
        store: Arc<dyn CellStore>,
        ctx: PartitionContext,
        log: Box<dyn LogStream>,
    ) -> Self {
        let locks = LockManager::new(ctx.lock_timeout);
        Partition {
            info,
            state: Mutex::new(PartitionState::Opening),
            gate: RwLock::new(()),
            ctx,
            store,
            log: Mutex::new(log),
            locks,
            txns: DashMap::new(),
            counters: PartitionCounters::default(),
        }
    }

    /// Create a brand-new partition with an empty log
    ///
    /// Fails if a log for `info.id` already exists.
    pub fn create(
        info: PartitionInfo,
        store: Arc<dyn CellStore>,
        ctx: PartitionContext,
    ) -> SiResult<Self> {
        let log = ctx.log_store.create_stream(info.id)?;
        let partition = Self::build(info, store, ctx, log);
        partition.set_state(PartitionState::Open);
        info!(
            target: "snapkv::partition",
            partition = %partition.id(),
            table = %partition.info.table,
            kind = ?partition.info.kind,
            "Partition created"
        );
        Ok(partition)
    }

    /// Open an existing partition by replaying its log
    ///
    /// A split child first checks that its log carries the half its parent
    /// assigned to it. Transactions the registry has already resolved are
    /// completed before the partition starts serving.
    pub fn open(
        info: PartitionInfo,
        store: Arc<dyn CellStore>,
        ctx: PartitionContext,
    ) -> SiResult<Self> {
        let id = info.id;
        let records = ctx.log_store.read_stream(id)?;

        if let Some(parent) = info.parent {
            if let Some(parent_records) = ctx.log_store.read_stream(parent)? {
                let own: &[LogRecord] = records.as_deref().unwrap_or(&[]);
                check_split_consistency(parent, &parent_records, id, own).map_err(|reason| {
                    error!(target: "snapkv::partition", partition = %id, parent = %parent, %reason, "Refusing to open split child");
                    SiError::SplitInconsistency {
                        partition: id,
                        reason,
                    }
                })?;
            }
        }

        let records = records.ok_or(SiError::UnknownPartition(id))?;
        let replayed = replay(&records);
        if replayed.sealed {
            return Err(SiError::PartitionNotServing {
                partition: id,
                state: PartitionState::Closed.to_string(),
            });
        }

        let log = ctx.log_store.open_stream(id)?;
        let partition = Self::build(info, store, ctx, log);
        let pending = replayed.pending_writes();
        for (txn_id, writes) in replayed.buffers {
            partition
                .txns
                .insert(txn_id, TransactionState::from_writes(txn_id, writes));
        }
        let resolved = partition.resolve_pending()?;
        partition.set_state(PartitionState::Open);

        info!(
            target: "snapkv::partition",
            partition = %id,
            records = records.len(),
            replayed_writes = pending,
            resolved,
            open_transactions = partition.txns.len(),
            "Partition opened from log"
        );
        Ok(partition)
    }

    /// Partition id
    pub fn id(&self) -> PartitionId {
        self.info.id
    }

    /// Partition description
    pub fn info(&self) -> &PartitionInfo {
        &self.info
    }

    /// Current lifecycle state
    pub fn state(&self) -> PartitionState {
        *self.state.lock()
    }

    /// Row lock occupancy
    pub fn lock_stats(&self) -> LockStats {
        self.locks.stats()
    }

    /// Request counters
    pub fn metrics(&self) -> PartitionMetrics {
        self.counters.snapshot()
    }

    /// Transactions with unresolved writes here, ascending
    pub fn pending_transactions(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.txns.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Number of writes `txn_id` has buffered here
    pub fn buffered_writes(&self, txn_id: TxnId) -> usize {
        self.txns.get(&txn_id).map_or(0, |s| s.len())
    }

    fn set_state(&self, next: PartitionState) {
        let mut state = self.state.lock();
        debug!(target: "snapkv::partition", partition = %self.info.id, from = %*state, to = %next, "State change");
        *state = next;
    }

    fn transition(&self, from: PartitionState, to: PartitionState) -> SiResult<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(self.not_serving(*state));
        }
        debug!(target: "snapkv::partition", partition = %self.info.id, from = %from, to = %to, "State change");
        *state = to;
        Ok(())
    }

    fn not_serving(&self, state: PartitionState) -> SiError {
        SiError::PartitionNotServing {
            partition: self.info.id,
            state: state.to_string(),
        }
    }

    fn ensure_serving(&self) -> SiResult<()> {
        match self.state() {
            PartitionState::Open => Ok(()),
            other => Err(self.not_serving(other)),
        }
    }

    fn ensure_owned(&self, row: &RowKey) -> SiResult<()> {
        if self.info.owns(row) {
            Ok(())
        } else {
            Err(SiError::RowOutOfRange {
                partition: self.info.id,
                row: row.clone(),
            })
        }
    }

    fn active_transaction(&self, txn_id: TxnId, operation: &'static str) -> SiResult<Transaction> {
        let txn = self.ctx.registry.fetch(txn_id)?;
        if txn.status != TxnStatus::Active {
            return Err(SiError::invalid_state(txn_id, txn.status, operation));
        }
        Ok(txn)
    }

    fn count_lock_timeout(&self, e: SiError) -> SiError {
        if matches!(e, SiError::LockTimeout { .. }) {
            PartitionCounters::bump(&self.counters.lock_timeouts);
        }
        e
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write `op` to `row` under `txn_id`
    pub fn write(&self, row: RowKey, txn_id: TxnId, op: WriteOp) -> SiResult<()> {
        let _gate = self.gate.read();
        self.ensure_serving()?;
        self.ensure_owned(&row)?;

        let txn = self.active_transaction(txn_id, "write")?;
        if !txn.allow_writes {
            return Err(SiError::ReadOnlyTransaction { id: txn_id });
        }

        if self.info.kind.is_transactional() {
            self.write_buffered(&txn, row, op)?;
        } else {
            self.write_auto_commit(row, op)?;
        }
        PartitionCounters::bump(&self.counters.writes);
        Ok(())
    }

    /// Insert or overwrite `row`
    pub fn put(&self, row: impl Into<RowKey>, txn_id: TxnId, value: impl Into<Vec<u8>>) -> SiResult<()> {
        self.write(row.into(), txn_id, WriteOp::Put(value.into()))
    }

    /// Delete `row`
    pub fn delete(&self, row: impl Into<RowKey>, txn_id: TxnId) -> SiResult<()> {
        self.write(row.into(), txn_id, WriteOp::Delete)
    }

    fn write_buffered(&self, txn: &Transaction, row: RowKey, op: WriteOp) -> SiResult<()> {
        self.locks
            .acquire_exclusive_write_lock(&row, txn.id)
            .map_err(|e| self.count_lock_timeout(e))?;
        let result = self.check_and_buffer(txn, row.clone(), op);
        self.locks.release_exclusive_write_lock(&row, txn.id);

        // Either the append failed and the transaction is now ERROR, or it
        // was rolled back while this write waited for the row lock
        if self.ctx.registry.fetch(txn.id)?.status.is_failed() {
            self.complete_locked(txn.id)?;
        }
        result
    }

    /// Conflict check, durable append, buffer; the caller holds the row lock
    fn check_and_buffer(&self, txn: &Transaction, row: RowKey, op: WriteOp) -> SiResult<()> {
        let mut existing = self.pending_cells(&row, Some(txn.id));
        existing.extend(self.store.versions(&row)?);
        if let Err(e) = check_write_conflict(txn, &row, &existing, &*self.ctx.registry) {
            PartitionCounters::bump(&self.counters.write_conflicts);
            debug!(target: "snapkv::partition", partition = %self.info.id, error = %e, "Write rejected");
            return Err(e);
        }

        let write = BufferedWrite::new(txn.id, row, op);
        let record = LogRecord::WriteBuffered(write.clone());
        // A commit or rollback of the writer waits for the append and the
        // push, so a write is never buffered after its transaction finished
        let buffered = self.ctx.registry.while_active(txn.id, "write", |_| {
            self.log.lock().append(&record).map_err(|e| SiError::LogAppendFailure {
                partition: self.info.id,
                reason: e.to_string(),
            })?;
            self.txns
                .entry(txn.id)
                .or_insert_with(|| TransactionState::new(txn.id))
                .push(write);
            Ok(())
        });

        if let Err(SiError::LogAppendFailure { reason, .. }) = &buffered {
            PartitionCounters::bump(&self.counters.log_failures);
            error!(
                target: "snapkv::log",
                partition = %self.info.id,
                txn = %txn.id,
                error = %reason,
                "Log append failed, marking transaction ERROR"
            );
            if let Err(mark) = self.ctx.registry.mark_error(txn.id) {
                warn!(target: "snapkv::txn", txn = %txn.id, error = %mark, "Could not mark transaction ERROR");
            }
        }
        buffered
    }

    /// System and non-transactional tables: apply immediately
    fn write_auto_commit(&self, row: RowKey, op: WriteOp) -> SiResult<()> {
        let ts = self.ctx.oracle.next()?;
        let cell = CellVersion::committed(row, TxnId::from(ts), ts, &op);
        self.store.apply(vec![cell])?;
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Buffered versions of `row`, optionally skipping one transaction
    fn pending_cells(&self, row: &RowKey, skip: Option<TxnId>) -> Vec<CellVersion> {
        self.txns
            .iter()
            .filter(|entry| Some(*entry.key()) != skip)
            .filter_map(|entry| {
                entry
                    .value()
                    .latest(row)
                    .map(|op| CellVersion::pending(row.clone(), *entry.key(), op))
            })
            .collect()
    }

    fn visible_version(
        &self,
        vis: &mut VisibilityContext<'_>,
        row: &RowKey,
    ) -> SiResult<Option<CellVersion>> {
        let reader = vis.reader().clone();
        let shared = reader.isolation == IsolationLevel::ReadCommitted;
        if shared {
            self.locks
                .acquire_shared_read_lock(row, reader.id)
                .map_err(|e| self.count_lock_timeout(e))?;
        }

        let pending = self.pending_cells(row, None);
        let result = self.store.versions(row).and_then(|mut candidates| {
            candidates.extend(pending);
            Ok(vis.resolve(&candidates)?.cloned())
        });

        if shared {
            self.locks.release_shared_read_lock(row, reader.id);
        }
        result
    }

    fn latest_committed(&self, row: &RowKey) -> SiResult<Option<CellVersion>> {
        Ok(self
            .store
            .versions(row)?
            .into_iter()
            .next()
            .filter(|cell| !cell.tombstone))
    }

    /// The version of `row` visible to `txn_id`, `None` if absent or deleted
    pub fn read(&self, row: &RowKey, txn_id: TxnId) -> SiResult<Option<CellVersion>> {
        let _gate = self.gate.read();
        self.ensure_serving()?;
        self.ensure_owned(row)?;
        PartitionCounters::bump(&self.counters.reads);

        if self.info.kind == TableKind::NonTransactional {
            return self.latest_committed(row);
        }
        let txn = self.active_transaction(txn_id, "read")?;
        let mut vis = VisibilityContext::new(&txn, &*self.ctx.registry)?;
        self.visible_version(&mut vis, row)
    }

    /// Visible rows in `[start, end)` (empty end = unbounded), clamped to
    /// this partition's range
    pub fn open_scanner(&self, start: &RowKey, end: &RowKey, txn_id: TxnId) -> SiResult<Scanner> {
        let _gate = self.gate.read();
        self.ensure_serving()?;
        PartitionCounters::bump(&self.counters.scans);

        let range = &self.info.range;
        let lo = std::cmp::max(start, &range.start).clone();
        let hi = match (end.is_empty(), range.end.is_empty()) {
            (true, _) => range.end.clone(),
            (false, true) => end.clone(),
            (false, false) => std::cmp::min(end, &range.end).clone(),
        };
        if !hi.is_empty() && hi <= lo {
            return Ok(Scanner::new(Vec::new()));
        }

        if self.info.kind == TableKind::NonTransactional {
            let mut out = Vec::new();
            for row in self.store.rows_in_range(&lo, &hi)? {
                if let Some(cell) = self.latest_committed(&row)? {
                    out.push((row, cell));
                }
            }
            return Ok(Scanner::new(out));
        }

        let txn = self.active_transaction(txn_id, "scan")?;
        let mut rows = BTreeSet::new();
        for entry in self.txns.iter() {
            rows.extend(entry.value().rows_in(&lo, &hi).map(|(row, _)| row.clone()));
        }
        rows.extend(self.store.rows_in_range(&lo, &hi)?);

        let mut vis = VisibilityContext::new(&txn, &*self.ctx.registry)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(cell) = self.visible_version(&mut vis, &row)? {
                out.push((row, cell));
            }
        }
        Ok(Scanner::new(out))
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Apply or discard `txn_id`'s buffer according to its registry status
    ///
    /// Fails with `InvalidTransactionState` while the transaction is still
    /// ACTIVE or COMMITTING.
    pub fn complete_transaction(&self, txn_id: TxnId) -> SiResult<Completion> {
        let _gate = self.gate.read();
        self.ensure_serving()?;
        self.complete_locked(txn_id)
    }

    fn complete_locked(&self, txn_id: TxnId) -> SiResult<Completion> {
        let txn = self.ctx.registry.fetch(txn_id)?;
        let completion = match txn.status {
            TxnStatus::Committed => {
                let commit_ts = txn.commit_timestamp.ok_or_else(|| {
                    SiError::storage(format!("{} is COMMITTED without a commit timestamp", txn_id))
                })?;
                match self.txns.entry(txn_id) {
                    Entry::Occupied(buffer) => {
                        let rows = self
                            .store
                            .apply(buffer.get().to_committed_cells(commit_ts))?;
                        buffer.remove();
                        self.log_resolution(txn_id, Resolution::Applied);
                        PartitionCounters::bump(&self.counters.applied);
                        Completion::Applied(rows)
                    }
                    Entry::Vacant(_) => Completion::Nothing,
                }
            }
            TxnStatus::RolledBack | TxnStatus::Error => self.discard(txn_id),
            status => return Err(SiError::invalid_state(txn_id, status, "complete")),
        };
        self.locks.release_all(txn_id);
        if completion != Completion::Nothing {
            debug!(target: "snapkv::partition", partition = %self.info.id, txn = %txn_id, ?completion, "Transaction completed");
        }
        Ok(completion)
    }

    fn discard(&self, txn_id: TxnId) -> Completion {
        match self.txns.remove(&txn_id) {
            Some((_, state)) => {
                self.log_resolution(txn_id, Resolution::Discarded);
                PartitionCounters::bump(&self.counters.discarded);
                Completion::Discarded(state.len())
            }
            None => Completion::Nothing,
        }
    }

    fn log_resolution(&self, txn_id: TxnId, outcome: Resolution) {
        let record = LogRecord::TxnResolved { txn_id, outcome };
        if let Err(e) = self.log.lock().append(&record) {
            // Replay re-resolves the transaction from the registry
            warn!(
                target: "snapkv::log",
                partition = %self.info.id,
                txn = %txn_id,
                error = %e,
                "Failed to log transaction resolution"
            );
        }
    }

    /// Complete every buffered transaction the registry has resolved
    ///
    /// Catches commits and rollbacks that finished while this partition was
    /// not yet reachable, e.g. between a split child's replay and its
    /// registration. Returns the number of transactions completed.
    pub fn resolve_finished(&self) -> SiResult<usize> {
        let _gate = self.gate.read();
        self.ensure_serving()?;
        self.resolve_pending()
    }

    fn resolve_pending(&self) -> SiResult<usize> {
        let mut resolved = 0;
        for txn_id in self.pending_transactions() {
            match self.ctx.registry.lookup(txn_id)?.map(|txn| txn.status) {
                None => {
                    warn!(target: "snapkv::partition", partition = %self.info.id, txn = %txn_id, "Discarding writes of unknown transaction");
                    self.discard(txn_id);
                    resolved += 1;
                }
                Some(status) if !status.is_pending() => {
                    self.complete_locked(txn_id)?;
                    resolved += 1;
                }
                Some(_) => {}
            }
        }
        Ok(resolved)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop serving: drain in-flight requests, sync the log, state → CLOSED
    ///
    /// The log is left unsealed so the partition can be reopened.
    pub fn close(&self) -> SiResult<()> {
        {
            let mut state = self.state.lock();
            if *state == PartitionState::Closed {
                return Ok(());
            }
            *state = PartitionState::Closed;
        }
        let _drained = self.gate.write();
        self.log.lock().sync()?;
        info!(target: "snapkv::partition", partition = %self.info.id, "Partition closed");
        Ok(())
    }

    /// Split at `split_key`, writing each child's half into a new log
    ///
    /// Drains in-flight requests, records the split boundary, bisects the
    /// unresolved writes, writes a `SplitMigrated` record into each child's
    /// log and seals this partition's log. On success the partition is
    /// CLOSED and the returned descriptions can be opened.
    pub fn split(
        &self,
        split_key: &RowKey,
        left: PartitionId,
        right: PartitionId,
    ) -> SiResult<(PartitionInfo, PartitionInfo)> {
        let (left_range, right_range) =
            self.info
                .range
                .split_at(split_key)
                .ok_or_else(|| SiError::RowOutOfRange {
                    partition: self.info.id,
                    row: split_key.clone(),
                })?;

        self.transition(PartitionState::Open, PartitionState::Splitting)?;
        let drained = self.gate.write();

        let child = |id, range| PartitionInfo {
            id,
            table: self.info.table.clone(),
            kind: self.info.kind,
            range,
            parent: Some(self.info.id),
        };
        let result = self
            .bisect_log(split_key, left, right)
            .map(|()| (child(left, left_range), child(right, right_range)));

        match &result {
            Ok(_) => self.set_state(PartitionState::Closed),
            Err(e) => {
                error!(target: "snapkv::partition", partition = %self.info.id, error = %e, "Split failed");
                self.set_state(PartitionState::Open);
            }
        }
        drop(drained);
        result
    }

    fn bisect_log(&self, split_key: &RowKey, left: PartitionId, right: PartitionId) -> SiResult<()> {
        // Checked before the boundary is recorded so a refused split leaves
        // the parent log untouched
        for id in [left, right] {
            if self.ctx.log_store.exists(id) {
                return Err(SiError::storage(format!("log for partition {} already exists", id)));
            }
        }

        let mut log = self.log.lock();
        let records = log.read_all()?;
        let halves = split_log(&records, split_key);

        log.append(&LogRecord::SplitBoundary {
            split_key: split_key.clone(),
            left,
            right,
        })
        .map_err(|e| SiError::LogAppendFailure {
            partition: self.info.id,
            reason: e.to_string(),
        })?;
        log.sync()?;

        let (left_writes, right_writes) = (halves.left.len(), halves.right.len());
        let mut created = Vec::with_capacity(2);
        if let Err(e) = self.hand_off(&mut **log, halves, left, right, &mut created) {
            self.abort_split(&mut **log, left, right, &created);
            return Err(e);
        }

        info!(
            target: "snapkv::partition",
            partition = %self.info.id,
            split_key = %split_key,
            left = %left,
            right = %right,
            left_writes,
            right_writes,
            "Partition log split"
        );
        Ok(())
    }

    /// Write each child's log, then seal this one
    fn hand_off(
        &self,
        log: &mut dyn LogStream,
        halves: SplitHalves,
        left: PartitionId,
        right: PartitionId,
        created: &mut Vec<PartitionId>,
    ) -> SiResult<()> {
        for (id, side, writes) in [
            (left, SplitSide::Left, halves.left),
            (right, SplitSide::Right, halves.right),
        ] {
            let mut stream = self.ctx.log_store.create_stream(id)?;
            created.push(id);
            stream.append(&LogRecord::SplitMigrated {
                parent: self.info.id,
                side,
                writes,
            })?;
            stream.sync()?;
        }
        log.append(&LogRecord::Sealed)
            .map_err(|e| SiError::LogAppendFailure {
                partition: self.info.id,
                reason: e.to_string(),
            })?;
        log.sync()?;
        Ok(())
    }

    /// Undo a split whose boundary was already recorded
    ///
    /// Child logs created so far are removed and the boundary is cancelled,
    /// so the parent replays as an ordinary unsplit partition.
    fn abort_split(
        &self,
        log: &mut dyn LogStream,
        left: PartitionId,
        right: PartitionId,
        created: &[PartitionId],
    ) {
        for id in created {
            if let Err(e) = self.ctx.log_store.remove_stream(*id) {
                warn!(target: "snapkv::log", partition = %self.info.id, child = %id, error = %e, "Could not remove child log of failed split");
            }
        }
        let cancelled = log
            .append(&LogRecord::SplitAborted { left, right })
            .and_then(|()| log.sync());
        if let Err(e) = cancelled {
            // Reopen treats the boundary as live until the next split
            warn!(target: "snapkv::log", partition = %self.info.id, error = %e, "Could not record split abort");
        }
    }
}
