//! Concurrency control for snapkv
//!
//! This crate implements snapshot isolation over the partitioned store:
//! - `TimestampOracle`: strictly increasing logical timestamps
//! - `TransactionRegistry`: authoritative transaction status with a
//!   write-through cache
//! - `VisibilityContext`: which version of a row a reader sees, and
//!   write-write conflict detection
//! - `LockManager`: per-partition row locks with bounded waits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock_manager;
pub mod oracle;
pub mod registry;
pub mod visibility;

pub use lock_manager::{LockManager, LockMode, LockStats, DEFAULT_LOCK_TIMEOUT};
pub use oracle::{TimestampOracle, TimestampSource, DEFAULT_RESERVATION_BATCH};
pub use registry::{now_millis, RegistryConfig, TransactionLookup, TransactionRegistry};
pub use visibility::{check_write_conflict, VisibilityContext};
