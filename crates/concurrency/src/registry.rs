//! Transaction registry
//!
//! Owns every transaction record. State transitions are persisted to the
//! `TransactionStore` first and only then written through to the in-process
//! cache, so the cache never shows a status that is not durable and never
//! keeps an ACTIVE/COMMITTING entry once a commit or rollback returned.
//!
//! Transitions on the same id are serialized by a striped lock. Cache fills
//! after a miss take the same stripe, so a fill can never overwrite a
//! concurrent transition with the older stored record.

use crate::oracle::TimestampSource;
use dashmap::DashSet;
use moka::sync::Cache;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use snapkv_core::{
    SiError, SiResult, Timestamp, Transaction, TransactionOptions, TxnId, TxnStatus,
};
use snapkv_durability::TransactionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STRIPES: usize = 64;

/// Read access to transaction records
///
/// The visibility engine only needs lookups; tests can back it with a map.
pub trait TransactionLookup: Send + Sync {
    /// The record for `id`, or `None` if it was never created
    fn lookup(&self, id: TxnId) -> SiResult<Option<Transaction>>;
}

/// Registry cache settings
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Maximum number of cached records
    pub cache_capacity: u64,
    /// Time-to-live of a cached record
    pub cache_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Milliseconds since the Unix epoch, used for keep-alive bookkeeping
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Authoritative owner of transaction status
pub struct TransactionRegistry {
    oracle: Arc<dyn TimestampSource>,
    store: Arc<dyn TransactionStore>,
    cache: Cache<TxnId, Transaction>,
    stripes: Box<[Mutex<()>]>,
    /// Ids of transactions that are not COMMITTED or ROLLED_BACK
    live: DashSet<TxnId>,
    /// Held shared from timestamp allocation until a new id is in `live`
    begins: RwLock<()>,
}

impl TransactionRegistry {
    /// Build a registry over `store`, indexing the non-terminal records it holds
    pub fn new(
        oracle: Arc<dyn TimestampSource>,
        store: Arc<dyn TransactionStore>,
        config: RegistryConfig,
    ) -> SiResult<Self> {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        let live = DashSet::new();
        for txn in store.scan()? {
            if !txn.status.is_terminal() {
                live.insert(txn.id);
            }
        }
        if !live.is_empty() {
            info!(target: "snapkv::txn", unresolved = live.len(), "Registry found unresolved transactions");
        }

        Ok(TransactionRegistry {
            oracle,
            store,
            cache,
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            live,
            begins: RwLock::new(()),
        })
    }

    fn stripe(&self, id: TxnId) -> MutexGuard<'_, ()> {
        self.stripes[(id.as_u64() % STRIPES as u64) as usize].lock()
    }

    /// Persist then publish; the caller holds the id's stripe
    fn publish(&self, txn: &Transaction) -> SiResult<()> {
        self.store.update(txn)?;
        self.cache.insert(txn.id, txn.clone());
        if txn.status.is_terminal() {
            self.live.remove(&txn.id);
        }
        Ok(())
    }

    /// Load under the stripe lock (cache first)
    fn load_locked(&self, id: TxnId) -> SiResult<Transaction> {
        if let Some(txn) = self.cache.get(&id) {
            return Ok(txn);
        }
        let txn = self
            .store
            .get(id)?
            .ok_or(SiError::UnknownTransaction { id })?;
        self.cache.insert(id, txn.clone());
        Ok(txn)
    }

    /// Start a transaction
    pub fn begin(&self, options: TransactionOptions) -> SiResult<Transaction> {
        if let Some(parent_id) = options.parent {
            let parent = self.fetch(parent_id)?;
            if parent.status != TxnStatus::Active {
                return Err(SiError::invalid_state(
                    parent_id,
                    parent.status,
                    "begin a child of",
                ));
            }
            if options.allow_writes && !parent.allow_writes {
                return Err(SiError::ReadOnlyTransaction { id: parent_id });
            }
        }

        let starting = self.begins.read();
        let start = self.oracle.next()?;
        let txn = Transaction::new(start, &options, now_millis());
        self.store.insert(&txn)?;
        self.cache.insert(txn.id, txn.clone());
        self.live.insert(txn.id);
        drop(starting);

        debug!(
            target: "snapkv::txn",
            txn = %txn.id,
            parent = ?txn.parent,
            isolation = %txn.isolation,
            writable = txn.allow_writes,
            "Transaction started"
        );
        Ok(txn)
    }

    /// Commit: ACTIVE → COMMITTING → COMMITTED
    ///
    /// A transaction left in COMMITTING by a failed persist keeps the commit
    /// timestamp it was given when the commit is retried.
    pub fn commit(&self, id: TxnId) -> SiResult<Transaction> {
        let _guard = self.stripe(id);
        let mut txn = self.load_locked(id)?;

        match txn.status {
            TxnStatus::Active => {
                let commit_ts = self.oracle.next()?;
                let mut committing = txn.clone();
                committing.status = TxnStatus::Committing;
                committing.commit_timestamp = Some(commit_ts);
                self.publish(&committing)?;
                txn = committing;
            }
            TxnStatus::Committing => {}
            status => return Err(SiError::invalid_state(id, status, "commit")),
        }

        txn.status = TxnStatus::Committed;
        self.publish(&txn)?;
        debug!(target: "snapkv::txn", txn = %id, commit_ts = ?txn.commit_timestamp, "Transaction committed");
        Ok(txn)
    }

    /// Roll back; idempotent on ROLLED_BACK, rejected on COMMITTED
    pub fn rollback(&self, id: TxnId) -> SiResult<Transaction> {
        let _guard = self.stripe(id);
        let mut txn = self.load_locked(id)?;

        match txn.status {
            TxnStatus::RolledBack => return Ok(txn),
            TxnStatus::Committed => {
                return Err(SiError::invalid_state(id, txn.status, "roll back"))
            }
            TxnStatus::Active | TxnStatus::Committing | TxnStatus::Error => {}
        }

        let previous = txn.status;
        txn.status = TxnStatus::RolledBack;
        self.publish(&txn)?;
        debug!(target: "snapkv::txn", txn = %id, from = %previous, "Transaction rolled back");
        Ok(txn)
    }

    /// Force a rollback regardless of the owning client
    pub fn kill(&self, id: TxnId) -> SiResult<Transaction> {
        let txn = self.rollback(id)?;
        warn!(target: "snapkv::txn", txn = %id, "Transaction killed");
        Ok(txn)
    }

    /// Move an ACTIVE or COMMITTING transaction to ERROR
    ///
    /// Called when a durable log append failed for one of its writes. The
    /// transaction can only be rolled back afterwards.
    pub fn mark_error(&self, id: TxnId) -> SiResult<Transaction> {
        let _guard = self.stripe(id);
        let mut txn = self.load_locked(id)?;
        match txn.status {
            TxnStatus::Error => return Ok(txn),
            TxnStatus::Active | TxnStatus::Committing => {}
            status => return Err(SiError::invalid_state(id, status, "mark as failed")),
        }
        txn.status = TxnStatus::Error;
        self.publish(&txn)?;
        warn!(target: "snapkv::txn", txn = %id, "Transaction marked ERROR");
        Ok(txn)
    }

    /// Renew the liveness timestamp of a pending transaction
    pub fn keep_alive(&self, id: TxnId) -> SiResult<Transaction> {
        let _guard = self.stripe(id);
        let mut txn = self.load_locked(id)?;
        if !txn.status.is_pending() {
            return Err(SiError::invalid_state(id, txn.status, "keep alive"));
        }
        txn.keep_alive_millis = now_millis();
        self.publish(&txn)?;
        Ok(txn)
    }

    /// Run `work` while `id` is held ACTIVE
    ///
    /// Fails with `InvalidTransactionState` if the transaction is not ACTIVE.
    /// Commit, rollback and `mark_error` on `id` wait until `work` returns,
    /// so anything it buffers is part of the transaction's write set. `work`
    /// must not call back into the registry.
    pub fn while_active<T>(
        &self,
        id: TxnId,
        operation: &'static str,
        work: impl FnOnce(&Transaction) -> SiResult<T>,
    ) -> SiResult<T> {
        let _guard = self.stripe(id);
        let txn = self.load_locked(id)?;
        if txn.status != TxnStatus::Active {
            return Err(SiError::invalid_state(id, txn.status, operation));
        }
        work(&txn)
    }

    /// Cache-first lookup; `UnknownTransaction` if never created
    pub fn fetch(&self, id: TxnId) -> SiResult<Transaction> {
        if let Some(txn) = self.cache.get(&id) {
            return Ok(txn);
        }
        let _guard = self.stripe(id);
        self.load_locked(id)
    }

    /// Non-terminal transactions, ordered by id
    pub fn list_active(&self) -> SiResult<Vec<Transaction>> {
        let mut ids: Vec<TxnId> = self.live.iter().map(|id| *id.key()).collect();
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let txn = self.fetch(id)?;
            if !txn.status.is_terminal() {
                out.push(txn);
            }
        }
        Ok(out)
    }

    /// Roll back every non-terminal transaction with `id <= max_id`
    pub fn kill_stale(&self, max_id: TxnId) -> SiResult<Vec<TxnId>> {
        let mut killed = Vec::new();
        for txn in self.list_active()? {
            if txn.id > max_id {
                break;
            }
            match self.kill(txn.id) {
                Ok(_) => killed.push(txn.id),
                Err(SiError::InvalidTransactionState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(killed)
    }

    /// Roll back non-terminal transactions whose keep-alive is older than `window`
    pub fn reap_stale(&self, now_millis: i64, window: Duration) -> SiResult<Vec<TxnId>> {
        let window_ms = window.as_millis() as i64;
        let mut reaped = Vec::new();
        for txn in self.list_active()? {
            let idle = now_millis - txn.keep_alive_millis;
            if idle <= window_ms {
                continue;
            }
            match self.rollback(txn.id) {
                Ok(_) => {
                    info!(target: "snapkv::reaper", txn = %txn.id, idle_ms = idle, "Reaped stale transaction");
                    reaped.push(txn.id);
                }
                // Committed between the listing and the rollback
                Err(SiError::InvalidTransactionState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Oldest snapshot any current or future transaction can read at
    ///
    /// The start timestamp of the oldest non-terminal transaction, or the
    /// last issued timestamp when none is running.
    pub fn snapshot_horizon(&self) -> SiResult<Timestamp> {
        let _quiet = self.begins.write();
        let oldest = self
            .list_active()?
            .iter()
            .map(|txn| txn.start_timestamp)
            .min();
        Ok(oldest.unwrap_or_else(|| self.oracle.last_issued()))
    }

    /// Forget terminal transactions that started before `horizon`
    ///
    /// Records named in `in_use` are kept, and so is everything a reader may
    /// still need to resolve: ancestors of non-terminal transactions, and
    /// dependent transactions with their ancestors, whose visibility follows
    /// the parent's outcome. Returns the number of records dropped.
    pub fn compact(
        &self,
        horizon: Timestamp,
        in_use: impl IntoIterator<Item = TxnId>,
    ) -> SiResult<usize> {
        let records = self.store.scan()?;
        let parents: FxHashMap<TxnId, Option<TxnId>> =
            records.iter().map(|txn| (txn.id, txn.parent)).collect();

        let mut keep: FxHashSet<TxnId> = in_use.into_iter().collect();
        for txn in &records {
            let mut next = if txn.dependent {
                Some(txn.id)
            } else if !txn.status.is_terminal() {
                txn.parent
            } else {
                None
            };
            while let Some(id) = next {
                if !keep.insert(id) {
                    break;
                }
                next = parents.get(&id).copied().flatten();
            }
        }

        let doomed: FxHashSet<TxnId> = records
            .iter()
            .filter(|txn| {
                txn.status.is_terminal()
                    && txn.start_timestamp < horizon
                    && !keep.contains(&txn.id)
            })
            .map(|txn| txn.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        // Terminal records never change again, so the filter is stable
        let dropped = self.store.retain(&|txn| !doomed.contains(&txn.id))?;
        for id in &doomed {
            self.cache.invalidate(id);
        }
        info!(target: "snapkv::txn", dropped, horizon = %horizon, "Compacted transaction records");
        Ok(dropped)
    }

    /// Number of records currently cached
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl TransactionLookup for TransactionRegistry {
    fn lookup(&self, id: TxnId) -> SiResult<Option<Transaction>> {
        match self.fetch(id) {
            Ok(txn) => Ok(Some(txn)),
            Err(SiError::UnknownTransaction { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
