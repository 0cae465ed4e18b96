//! Database engine for snapkv
//!
//! This crate orchestrates the lower layers:
//! - Partition: key-range shard running transactional reads, writes, scans,
//!   completion and split
//! - Database: control plane over partitions and transactions, with
//!   open/close, catalog and configuration
//! - Background reaper for transactions whose keep-alive has gone stale

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod database;
pub mod partition;
mod reaper;

pub use coordinator::TransactionMetrics;
pub use database::{
    CatalogEntry, CompactionStats, Database, RetryConfig, SnapConfig, CATALOG_FILE_NAME,
    CONFIG_FILE_NAME,
};
pub use partition::{
    Completion, Partition, PartitionContext, PartitionInfo, PartitionMetrics, PartitionState,
    Scanner, TableKind, TransactionState,
};
