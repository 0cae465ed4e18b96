//! Database: the control plane over partitions and transactions
//!
//! A `Database` ties the shared services together:
//! - the timestamp oracle and the transaction registry
//! - one partition log store and the partition catalog
//! - one `CellStore` per table, shared by all of that table's partitions
//! - the background reaper that rolls back transactions whose keep-alive
//!   has gone stale
//!
//! Commit and rollback are decided by the registry. Afterwards the database
//! asks every serving partition to apply or discard the transaction's
//! buffered writes. A partition that cannot do it right away (closed,
//! splitting, crashed) resolves the transaction from the registry the next
//! time it opens.
//!
//! Row requests are routed to the OPEN partition owning the row. While part
//! of a key range is owned by a partition that is not serving (mid-split,
//! closed, failed to open) requests touching it fail with the retryable
//! `PartitionNotServing` instead of silently missing rows.
//!
//! ## Data directory layout
//!
//! ```text
//! <dir>/snapkv.toml        configuration
//! <dir>/partitions.toml    partition catalog
//! <dir>/oracle             timestamp reservation bound
//! <dir>/txns/              durable transaction table
//! <dir>/logs/              one log per partition
//! ```

mod catalog;
pub mod config;
mod transactions;

pub use catalog::{CatalogEntry, CATALOG_FILE_NAME};
pub use config::{SnapConfig, CONFIG_FILE_NAME};
pub use transactions::RetryConfig;

use crate::coordinator::{TransactionCounters, TransactionMetrics};
use crate::partition::{
    Partition, PartitionContext, PartitionInfo, PartitionState, TableKind,
};
use crate::reaper::Reaper;
use catalog::Catalog;
use dashmap::DashMap;
use parking_lot::Mutex;
use snapkv_concurrency::{
    now_millis, LockStats, TimestampOracle, TimestampSource, TransactionRegistry,
    DEFAULT_RESERVATION_BATCH,
};
use snapkv_core::{
    KeyRange, PartitionId, RowKey, SiError, SiResult, Timestamp, Transaction,
    TransactionOptions, TxnId, WriteOp,
};
use snapkv_durability::{
    replay, FileLogStore, FileTransactionStore, LogStore, MemoryLogStore,
    MemoryTransactionStore, TransactionStore,
};
use std::collections::BTreeSet;
use snapkv_storage::{CellStore, MemoryCellStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const ORACLE_FILE_NAME: &str = "oracle";
const TXN_DIR_NAME: &str = "txns";
const LOG_DIR_NAME: &str = "logs";

/// What one `Database::compact` pass dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Oldest snapshot still protected
    pub horizon: Timestamp,
    /// Cell versions removed across all tables
    pub versions_dropped: usize,
    /// Transaction records removed from the registry
    pub transactions_dropped: usize,
}

/// Snapshot-isolated, partitioned key-value database
pub struct Database {
    config: SnapConfig,
    data_dir: Option<PathBuf>,
    registry: Arc<TransactionRegistry>,
    ctx: PartitionContext,
    tables: DashMap<String, Arc<dyn CellStore>>,
    partitions: DashMap<PartitionId, Arc<Partition>>,
    catalog: Catalog,
    counters: TransactionCounters,
    reaper: Mutex<Option<Reaper>>,
    shut_down: AtomicBool,
}

impl Database {
    /// Open (or create) a database in `dir`
    ///
    /// Writes a default `snapkv.toml` on first open, then reads it. Every
    /// partition in the catalog is reopened from its log.
    pub fn open(dir: impl AsRef<Path>) -> SiResult<Arc<Self>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        SnapConfig::write_default_if_missing(&config_path)?;
        let config = SnapConfig::from_file(&config_path)?;
        Self::open_with(dir, config, Vec::new())
    }

    /// Open `dir` with an explicit config and pre-registered table stores
    ///
    /// Tables not listed get an in-memory `CellStore`.
    pub fn open_with(
        dir: impl AsRef<Path>,
        config: SnapConfig,
        tables: Vec<(String, Arc<dyn CellStore>)>,
    ) -> SiResult<Arc<Self>> {
        config.validate()?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mode = config.durability_mode()?;

        let log_store: Arc<dyn LogStore> = Arc::new(FileLogStore::open(dir.join(LOG_DIR_NAME), mode)?);
        let txn_store = Arc::new(FileTransactionStore::open(dir.join(TXN_DIR_NAME), mode)?);
        let oracle = Arc::new(TimestampOracle::open(
            dir.join(ORACLE_FILE_NAME),
            DEFAULT_RESERVATION_BATCH,
        )?);

        // Ids are start timestamps; never hand one out twice
        if let Some(max) = txn_store.scan()?.iter().map(|t| t.id).max() {
            oracle.advance_past(max.start_timestamp());
        }

        let catalog = Catalog::open(&dir.join(CATALOG_FILE_NAME))?;
        info!(target: "snapkv::txn", path = %dir.display(), durability = %mode.description(), "Opening database");
        Self::assemble(config, Some(dir.to_path_buf()), oracle, txn_store, log_store, catalog, tables)
    }

    /// Database with no files at all
    pub fn in_memory(config: SnapConfig) -> SiResult<Arc<Self>> {
        config.validate()?;
        Self::assemble(
            config,
            None,
            Arc::new(TimestampOracle::in_memory(Timestamp::ZERO)),
            Arc::new(MemoryTransactionStore::new()),
            Arc::new(MemoryLogStore::new()),
            Catalog::in_memory(),
            Vec::new(),
        )
    }

    fn assemble(
        config: SnapConfig,
        data_dir: Option<PathBuf>,
        oracle: Arc<TimestampOracle>,
        txn_store: Arc<dyn TransactionStore>,
        log_store: Arc<dyn LogStore>,
        catalog: Catalog,
        tables: Vec<(String, Arc<dyn CellStore>)>,
    ) -> SiResult<Arc<Self>> {
        let oracle: Arc<dyn TimestampSource> = oracle;
        let registry = Arc::new(TransactionRegistry::new(
            Arc::clone(&oracle),
            txn_store,
            config.registry_config(),
        )?);
        let ctx = PartitionContext {
            registry: Arc::clone(&registry),
            oracle,
            log_store,
            lock_timeout: config.lock_timeout(),
        };

        let db = Arc::new(Database {
            config,
            data_dir,
            registry,
            ctx,
            tables: tables.into_iter().collect(),
            partitions: DashMap::new(),
            catalog,
            counters: TransactionCounters::default(),
            reaper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });
        db.reclaim_orphan_logs()?;
        db.reopen_catalog();
        db.start_reaper()?;
        Ok(db)
    }

    /// Remove logs no catalog entry refers to
    ///
    /// They are left by a crash between creating a partition's log and
    /// recording it, or in the middle of a split. Their ids were allocated
    /// and are never handed out again.
    fn reclaim_orphan_logs(&self) -> SiResult<()> {
        for id in self.ctx.log_store.list_streams()? {
            if self.catalog.get(id).is_some() {
                continue;
            }
            warn!(target: "snapkv::partition", partition = %id, "Removing log with no catalog entry");
            self.ctx.log_store.remove_stream(id)?;
        }
        Ok(())
    }

    fn reopen_catalog(&self) {
        for info in self.catalog.live() {
            let id = info.id;
            let store = self.table_store(&info.table);
            match Partition::open(info, store, self.ctx.clone()) {
                Ok(partition) => {
                    self.partitions.insert(id, Arc::new(partition));
                }
                Err(e) => {
                    // Stays offline until reopen_partition succeeds
                    error!(target: "snapkv::partition", partition = %id, error = %e, "Partition failed to open");
                }
            }
        }
    }

    fn start_reaper(self: &Arc<Self>) -> SiResult<()> {
        let Some(interval) = self.config.reaper_interval() else {
            return Ok(());
        };
        let db: Weak<Database> = Arc::downgrade(self);
        let compaction = self.config.compaction_interval();
        let mut last_compaction = Instant::now();
        let reaper = Reaper::spawn(interval, move || {
            let Some(db) = db.upgrade() else {
                return false;
            };
            if let Err(e) = db.reap_stale_transactions() {
                warn!(target: "snapkv::reaper", error = %e, "Reaper pass failed");
            }
            if compaction.map_or(false, |every| last_compaction.elapsed() >= every) {
                last_compaction = Instant::now();
                if let Err(e) = db.compact() {
                    warn!(target: "snapkv::reaper", error = %e, "Compaction pass failed");
                }
            }
            true
        })?;
        *self.reaper.lock() = Some(reaper);
        Ok(())
    }

    /// Active configuration
    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    /// Data directory, `None` for in-memory databases
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// The transaction registry
    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    // ========================================================================
    // Tables and partitions
    // ========================================================================

    /// The cell store backing `table`, created in memory on first use
    pub fn table_store(&self, table: &str) -> Arc<dyn CellStore> {
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(MemoryCellStore::new()) as Arc<dyn CellStore>)
            .clone()
    }

    /// Back `table` with `store`; fails if the table already has one
    pub fn register_table_store(&self, table: &str, store: Arc<dyn CellStore>) -> SiResult<()> {
        match self.tables.entry(table.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SiError::config(format!(
                "table '{}' already has a cell store",
                table
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(store);
                Ok(())
            }
        }
    }

    /// Create a partition of `table` owning `range`
    pub fn create_partition(
        &self,
        table: &str,
        kind: TableKind,
        range: KeyRange,
    ) -> SiResult<Arc<Partition>> {
        self.ensure_running()?;
        let overlaps = self.catalog.live().into_iter().any(|info| {
            info.table == table && ranges_overlap(&info.range, &range)
        });
        if overlaps {
            return Err(SiError::config(format!(
                "range [{}, {}) overlaps an existing partition of table '{}'",
                range.start, range.end, table
            )));
        }

        let id = self.catalog.allocate_id()?;
        let info = PartitionInfo::new(id, table, kind, range);
        let partition = Arc::new(Partition::create(
            info.clone(),
            self.table_store(table),
            self.ctx.clone(),
        )?);
        self.catalog.record(&info)?;
        self.partitions.insert(id, Arc::clone(&partition));
        Ok(partition)
    }

    /// Serving (or closed) partition by id
    pub fn partition(&self, id: PartitionId) -> SiResult<Arc<Partition>> {
        self.partitions
            .get(&id)
            .map(|p| Arc::clone(p.value()))
            .ok_or(SiError::UnknownPartition(id))
    }

    /// The open partition of `table` whose range contains `row`
    ///
    /// Fails with the retryable `PartitionNotServing` while the owner is
    /// splitting, closed or offline.
    pub fn partition_for(&self, table: &str, row: &RowKey) -> SiResult<Arc<Partition>> {
        let mut not_serving = None;
        for entry in self.partitions.iter() {
            let info = entry.info();
            if info.table != table || !info.owns(row) {
                continue;
            }
            match entry.state() {
                PartitionState::Open => return Ok(Arc::clone(entry.value())),
                state => not_serving = Some((info.id, state)),
            }
        }
        if let Some((partition, state)) = not_serving {
            return Err(SiError::PartitionNotServing {
                partition,
                state: state.to_string(),
            });
        }
        match self.offline_owner(table, |info| info.owns(row)) {
            Some(partition) => Err(SiError::PartitionNotServing {
                partition,
                state: PartitionState::Closed.to_string(),
            }),
            None => Err(SiError::storage(format!(
                "no partition of table '{}' owns row {}",
                table, row
            ))),
        }
    }

    /// A live catalog partition of `table` matching `covers` that is not
    /// loaded, i.e. it failed to open
    fn offline_owner(
        &self,
        table: &str,
        covers: impl Fn(&PartitionInfo) -> bool,
    ) -> Option<PartitionId> {
        self.catalog
            .live()
            .into_iter()
            .filter(|info| info.table == table && !self.partitions.contains_key(&info.id))
            .find(|info| covers(info))
            .map(|info| info.id)
    }

    /// Open partitions of `table` covering `[start, end)`, in key order
    ///
    /// Gaps no partition was ever assigned are skipped. A gap owned by a
    /// partition that is not serving fails with `PartitionNotServing`.
    fn serving_partitions(&self, table: &str, start: &RowKey, end: &RowKey) -> SiResult<Vec<Arc<Partition>>> {
        let wanted = KeyRange::new(start.clone(), end.clone());
        let mut open: Vec<Arc<Partition>> = self
            .partitions
            .iter()
            .filter(|p| {
                p.info().table == table
                    && p.state() == PartitionState::Open
                    && ranges_overlap(&p.info().range, &wanted)
            })
            .map(|p| Arc::clone(p.value()))
            .collect();
        open.sort_by(|a, b| a.info().range.start.cmp(&b.info().range.start));

        let mut cursor = start.clone();
        let mut covered_to_end = false;
        for partition in &open {
            let range = &partition.info().range;
            if range.start > cursor {
                self.ensure_unowned(table, &cursor, &range.start)?;
            }
            if range.end.is_empty() {
                covered_to_end = true;
                break;
            }
            cursor = std::cmp::max(cursor, range.end.clone());
        }
        let tail_open = end.is_empty() || cursor < *end;
        if !covered_to_end && tail_open {
            self.ensure_unowned(table, &cursor, end)?;
        }
        Ok(open)
    }

    /// Fail if some partition owns rows in `[start, end)`; nothing there is open
    fn ensure_unowned(&self, table: &str, start: &RowKey, end: &RowKey) -> SiResult<()> {
        let gap = KeyRange::new(start.clone(), end.clone());
        let loaded = self.partitions.iter().find_map(|p| {
            let info = p.info();
            (info.table == table && ranges_overlap(&info.range, &gap)).then(|| (info.id, p.state()))
        });
        let owner = loaded.or_else(|| {
            self.offline_owner(table, |info| ranges_overlap(&info.range, &gap))
                .map(|id| (id, PartitionState::Closed))
        });
        match owner {
            Some((partition, state)) => Err(SiError::PartitionNotServing {
                partition,
                state: state.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Descriptions of every loaded partition, ordered by id
    pub fn partitions(&self) -> Vec<PartitionInfo> {
        let mut infos: Vec<PartitionInfo> =
            self.partitions.iter().map(|p| p.info().clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Catalog entry for `id`, including retired partitions
    pub fn catalog_entry(&self, id: PartitionId) -> Option<CatalogEntry> {
        self.catalog.get(id)
    }

    /// Split `id` at `split_key` into two new serving partitions
    ///
    /// Returns `(left, right)`; the split key belongs to the right child.
    pub fn split_partition(
        &self,
        id: PartitionId,
        split_key: &RowKey,
    ) -> SiResult<(PartitionId, PartitionId)> {
        self.ensure_running()?;
        let parent = self.partition(id)?;
        let left_id = self.catalog.allocate_id()?;
        let right_id = self.catalog.allocate_id()?;

        let (left, right) = parent.split(split_key, left_id, right_id)?;
        self.catalog.record_split(id, &left, &right)?;

        // The closed parent stays registered until both children serve, so
        // requests for its range fail retryably instead of finding nothing
        let store = self.table_store(&parent.info().table);
        let mut children = Vec::with_capacity(2);
        for info in [left, right] {
            let child = Arc::new(Partition::open(info, Arc::clone(&store), self.ctx.clone())?);
            self.partitions.insert(child.id(), Arc::clone(&child));
            children.push(child);
        }
        self.partitions.remove(&id);
        for child in &children {
            // Commits that landed between the child's replay and its
            // registration missed it in `complete_everywhere`
            child.resolve_finished()?;
        }
        info!(
            target: "snapkv::partition",
            parent = %id,
            left = %left_id,
            right = %right_id,
            split_key = %split_key,
            "Partition split"
        );
        Ok((left_id, right_id))
    }

    /// Close `id`; it keeps its log and can be reopened
    pub fn close_partition(&self, id: PartitionId) -> SiResult<()> {
        self.partition(id)?.close()
    }

    /// Reopen `id` from its log
    ///
    /// A partition that is already open is returned as is. Retired (split)
    /// partitions cannot be reopened.
    pub fn reopen_partition(&self, id: PartitionId) -> SiResult<Arc<Partition>> {
        self.ensure_running()?;
        let entry = self.catalog.get(id).ok_or(SiError::UnknownPartition(id))?;
        if entry.retired {
            return Err(SiError::PartitionNotServing {
                partition: id,
                state: PartitionState::Closed.to_string(),
            });
        }
        if let Some(existing) = self.partitions.get(&id).map(|p| Arc::clone(p.value())) {
            if existing.state() == PartitionState::Open {
                return Ok(existing);
            }
            existing.close()?;
        }

        let store = self.table_store(&entry.info.table);
        let partition = Arc::new(Partition::open(entry.info, store, self.ctx.clone())?);
        self.partitions.insert(id, Arc::clone(&partition));
        partition.resolve_finished()?;
        Ok(partition)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    fn ensure_running(&self) -> SiResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SiError::config("database has been shut down"));
        }
        Ok(())
    }

    /// Start a transaction
    pub fn begin_transaction(&self, options: TransactionOptions) -> SiResult<Transaction> {
        self.ensure_running()?;
        let txn = self.registry.begin(options)?;
        self.counters.record_start();
        Ok(txn)
    }

    /// Current record of `id`
    pub fn transaction_status(&self, id: TxnId) -> SiResult<Transaction> {
        self.registry.fetch(id)
    }

    /// Commit `id` and apply its writes on every serving partition
    pub fn commit_transaction(&self, id: TxnId) -> SiResult<Transaction> {
        let txn = self.registry.commit(id)?;
        self.counters.record_commit();
        self.complete_everywhere(id);
        Ok(txn)
    }

    /// Roll back `id` and discard its writes
    pub fn rollback_transaction(&self, id: TxnId) -> SiResult<Transaction> {
        let txn = self.registry.rollback(id)?;
        self.counters.record_rollback();
        self.complete_everywhere(id);
        Ok(txn)
    }

    /// Forcibly roll back `id`, whoever owns it
    pub fn kill_transaction(&self, id: TxnId) -> SiResult<Transaction> {
        let txn = self.registry.kill(id)?;
        self.counters.record_kill(1);
        self.complete_everywhere(id);
        Ok(txn)
    }

    /// Renew the keep-alive of `id`
    pub fn keep_alive(&self, id: TxnId) -> SiResult<Transaction> {
        self.registry.keep_alive(id)
    }

    /// Kill every unresolved transaction with id `<= max_id`
    pub fn kill_stale_transactions(&self, max_id: TxnId) -> SiResult<Vec<TxnId>> {
        let killed = self.registry.kill_stale(max_id)?;
        self.counters.record_kill(killed.len() as u64);
        for id in &killed {
            self.complete_everywhere(*id);
        }
        if !killed.is_empty() {
            warn!(target: "snapkv::txn", count = killed.len(), max_id = %max_id, "Killed stale transactions");
        }
        Ok(killed)
    }

    /// Roll back transactions whose keep-alive is older than the configured
    /// staleness window; the background reaper calls this periodically
    pub fn reap_stale_transactions(&self) -> SiResult<Vec<TxnId>> {
        let reaped = self
            .registry
            .reap_stale(now_millis(), self.config.staleness_window())?;
        self.counters.record_reap(reaped.len() as u64);
        for id in &reaped {
            self.complete_everywhere(*id);
        }
        Ok(reaped)
    }

    /// Transactions that are not COMMITTED or ROLLED_BACK, ordered by id
    pub fn list_active_transactions(&self) -> SiResult<Vec<Transaction>> {
        self.registry.list_active()
    }

    /// Row lock occupancy of one partition
    pub fn get_lock_manager_stats(&self, partition: PartitionId) -> SiResult<LockStats> {
        Ok(self.partition(partition)?.lock_stats())
    }

    /// Lifecycle counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.counters.snapshot()
    }

    /// Drop versions and transaction records no reader can need any more
    ///
    /// Cell versions older than the snapshot horizon are collected from every
    /// table, keeping the newest one at or before it. Terminal transaction
    /// records that started before the horizon are forgotten, except those a
    /// partition still buffers writes for and ancestors of live transactions.
    pub fn compact(&self) -> SiResult<CompactionStats> {
        self.ensure_running()?;
        let horizon = self.registry.snapshot_horizon()?;

        let stores: Vec<(String, Arc<dyn CellStore>)> = self
            .tables
            .iter()
            .map(|t| (t.key().clone(), Arc::clone(t.value())))
            .collect();
        let mut versions_dropped = 0;
        for (table, store) in stores {
            let dropped = store.gc(horizon)?;
            if dropped > 0 {
                debug!(target: "snapkv::storage", table = %table, dropped, "Collected old versions");
            }
            versions_dropped += dropped;
        }

        let buffered = self.buffered_transactions()?;
        let transactions_dropped = self.registry.compact(horizon, buffered)?;
        let stats = CompactionStats {
            horizon,
            versions_dropped,
            transactions_dropped,
        };
        info!(
            target: "snapkv::txn",
            horizon = %horizon,
            versions_dropped,
            transactions_dropped,
            "Compaction finished"
        );
        Ok(stats)
    }

    /// Every transaction with writes buffered in some live partition,
    /// including partitions that are not loaded
    fn buffered_transactions(&self) -> SiResult<BTreeSet<TxnId>> {
        let mut ids = BTreeSet::new();
        for info in self.catalog.live() {
            let loaded = self.partitions.get(&info.id).map(|p| Arc::clone(p.value()));
            match loaded {
                Some(partition) => ids.extend(partition.pending_transactions()),
                None => {
                    if let Some(records) = self.ctx.log_store.read_stream(info.id)? {
                        ids.extend(replay(&records).buffers.into_keys());
                    }
                }
            }
        }
        Ok(ids)
    }

    fn complete_everywhere(&self, id: TxnId) {
        let partitions: Vec<Arc<Partition>> =
            self.partitions.iter().map(|p| Arc::clone(p.value())).collect();
        for partition in partitions {
            match partition.complete_transaction(id) {
                Ok(_) => {}
                // Resolved from the registry when it next opens
                Err(SiError::PartitionNotServing { .. }) => {}
                Err(e) => {
                    warn!(
                        target: "snapkv::partition",
                        partition = %partition.id(),
                        txn = %id,
                        error = %e,
                        "Could not complete transaction on partition"
                    );
                }
            }
        }
    }

    // ========================================================================
    // Row API
    // ========================================================================

    /// Write `op` to `row` of `table`
    pub fn write(&self, table: &str, row: impl Into<RowKey>, txn: TxnId, op: WriteOp) -> SiResult<()> {
        let row = row.into();
        self.partition_for(table, &row)?.write(row, txn, op)
    }

    /// Insert or overwrite
    pub fn put(
        &self,
        table: &str,
        row: impl Into<RowKey>,
        txn: TxnId,
        value: impl Into<Vec<u8>>,
    ) -> SiResult<()> {
        self.write(table, row, txn, WriteOp::Put(value.into()))
    }

    /// Delete
    pub fn delete(&self, table: &str, row: impl Into<RowKey>, txn: TxnId) -> SiResult<()> {
        self.write(table, row, txn, WriteOp::Delete)
    }

    /// Value of `row` visible to `txn`
    pub fn get(&self, table: &str, row: impl Into<RowKey>, txn: TxnId) -> SiResult<Option<Vec<u8>>> {
        let row = row.into();
        Ok(self
            .partition_for(table, &row)?
            .read(&row, txn)?
            .map(|cell| cell.value))
    }

    /// Visible rows of `table` in `[start, end)` across its partitions
    pub fn scan(
        &self,
        table: &str,
        start: impl Into<RowKey>,
        end: impl Into<RowKey>,
        txn: TxnId,
    ) -> SiResult<Vec<(RowKey, Vec<u8>)>> {
        let (start, end) = (start.into(), end.into());
        let mut out = Vec::new();
        for partition in self.serving_partitions(table, &start, &end)? {
            out.extend(
                partition
                    .open_scanner(&start, &end, txn)?
                    .map(|(row, cell)| (row, cell.value)),
            );
        }
        Ok(out)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the reaper and close every partition
    ///
    /// Idempotent. Unresolved transactions stay in the registry and in the
    /// partition logs.
    pub fn shutdown(&self) -> SiResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(mut reaper) = self.reaper.lock().take() {
            reaper.stop();
        }
        let mut first_error = None;
        for entry in self.partitions.iter() {
            if let Err(e) = entry.value().close() {
                error!(target: "snapkv::partition", partition = %entry.key(), error = %e, "Close failed during shutdown");
                first_error.get_or_insert(e);
            }
        }
        debug!(target: "snapkv::txn", "Database shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(target: "snapkv::txn", error = %e, "Shutdown on drop failed");
        }
    }
}

fn ranges_overlap(a: &KeyRange, b: &KeyRange) -> bool {
    let a_before_b = !a.end.is_empty() && a.end <= b.start;
    let b_before_a = !b.end.is_empty() && b.end <= a.start;
    !(a_before_b || b_before_a)
}
