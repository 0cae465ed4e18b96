//! snapkv - snapshot-isolation transactions over a partitioned key-value store
//!
//! Rows live in partitions, each owning a key range of one table. Every
//! transaction reads from a consistent snapshot taken at its start timestamp
//! and buffers its writes in the partitions it touches. Commit is a single
//! durable status change in the transaction registry, after which partitions
//! apply the buffered writes to the table's cell store.
//!
//! # Quick Start
//!
//! ```ignore
//! use snapkv::{Database, KeyRange, SnapConfig, TableKind, TransactionOptions};
//!
//! let db = Database::in_memory(SnapConfig::default())?;
//! db.create_partition("accounts", TableKind::User, KeyRange::unbounded())?;
//!
//! let txn = db.begin_transaction(TransactionOptions::new())?;
//! db.put("accounts", "alice", txn.id, "100")?;
//! db.commit_transaction(txn.id)?;
//! ```
//!
//! # Crates
//!
//! - `snapkv-core`: identifiers, transaction records, cell versions, errors
//! - `snapkv-storage`: the versioned `CellStore` under each table
//! - `snapkv-durability`: framing, partition logs, the transaction table
//! - `snapkv-concurrency`: timestamp oracle, registry, visibility, row locks
//! - `snapkv-engine`: partitions and the `Database` control plane

pub use snapkv_concurrency::{
    LockManager, LockMode, LockStats, RegistryConfig, TimestampOracle, TimestampSource,
    TransactionLookup, TransactionRegistry, VisibilityContext,
};
pub use snapkv_core::{
    BufferedWrite, CellVersion, CommitMarker, IsolationLevel, KeyRange, PartitionId, RowKey,
    SiError, SiResult, Timestamp, Transaction, TransactionOptions, TxnId, TxnStatus, WriteOp,
};
pub use snapkv_durability::{
    DurabilityError, DurabilityMode, FileLogStore, FileTransactionStore, LogRecord, LogStore,
    LogStream, MemoryLogStore, MemoryTransactionStore, TransactionStore,
};
pub use snapkv_engine::{
    CatalogEntry, CompactionStats, Completion, Database, Partition, PartitionContext,
    PartitionInfo, PartitionMetrics, PartitionState, RetryConfig, Scanner, SnapConfig, TableKind,
    TransactionMetrics, CATALOG_FILE_NAME, CONFIG_FILE_NAME,
};
pub use snapkv_storage::{CellStore, MemoryCellStore};
