//! Per-partition transaction log
//!
//! Every write accepted by a partition is appended here before it is
//! acknowledged. The log is the partition's source of truth for unresolved
//! transaction buffers after a crash, a reopen or a split.

mod record;
mod replay;
mod store;

pub use record::{LogRecord, Resolution, SplitSide};
pub use replay::{
    bisect, check_split_consistency, replay, split_log, ReplayState, SplitHalves, SplitPoint,
    TxnBuffers,
};
pub use store::{
    FileLogStore, LogStore, LogStream, MemoryLogStore, LOG_FORMAT_VERSION, LOG_HEADER_SIZE,
    LOG_MAGIC,
};
