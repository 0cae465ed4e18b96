//! Durability layer for snapkv
//!
//! This crate handles everything that touches disk:
//!
//! - Record framing with CRC32 checksums
//! - Durability modes: Always, Standard (default), Cache
//! - Partition transaction logs: append, replay and split
//! - The durable transaction table used by the registry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod mode;
pub mod partition_log;
pub mod txn_table;

pub use error::{DurabilityError, DurabilityResult};
pub use frame::{append_frame, decode_frame, encode_frame, FrameError, Truncate};
pub use mode::DurabilityMode;
pub use partition_log::{
    bisect, check_split_consistency, replay, split_log, FileLogStore, LogRecord, LogStore,
    LogStream, MemoryLogStore, ReplayState, Resolution, SplitHalves, SplitPoint, SplitSide,
    TxnBuffers,
};
pub use txn_table::{FileTransactionStore, MemoryTransactionStore, TransactionStore};
