//! Error types for snapkv
//!
//! All layers surface failures as `SiError`. Retryable kinds (write conflicts,
//! lock timeouts, partitions that are not serving) tell the caller to retry the
//! whole operation, usually under a new transaction.

use crate::transaction::TxnStatus;
use crate::types::{PartitionId, RowKey, TxnId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for snapkv operations
pub type SiResult<T> = std::result::Result<T, SiError>;

/// Error types for the snapshot isolation layer
#[derive(Debug, Error)]
pub enum SiError {
    /// Lookup on a transaction id that was never created
    #[error("Unknown transaction {id}")]
    UnknownTransaction {
        /// Requested id
        id: TxnId,
    },

    /// Operation not allowed in the transaction's current state
    #[error("Invalid transaction state: cannot {operation} {id} while {status}")]
    InvalidTransactionState {
        /// Transaction id
        id: TxnId,
        /// Status found
        status: TxnStatus,
        /// Attempted operation
        operation: &'static str,
    },

    /// Concurrent writer detected on the same row
    #[error("Write conflict on row {row}: {txn} conflicts with {other}")]
    WriteConflict {
        /// Contended row
        row: RowKey,
        /// Transaction whose write was rejected
        txn: TxnId,
        /// Transaction that owns the conflicting version
        other: TxnId,
    },

    /// Row lock could not be acquired within the wait bound
    #[error("Lock timeout on row {row} for {txn} after {waited:?}")]
    LockTimeout {
        /// Contended row
        row: RowKey,
        /// Waiting transaction
        txn: TxnId,
        /// Time spent waiting
        waited: Duration,
    },

    /// Durable log write failed; the in-flight write was not acknowledged
    #[error("Log append failed on partition {partition}: {reason}")]
    LogAppendFailure {
        /// Partition whose log failed
        partition: PartitionId,
        /// Underlying failure
        reason: String,
    },

    /// Child partition log is missing its migrated half
    #[error("Split inconsistency on partition {partition}: {reason}")]
    SplitInconsistency {
        /// Partition that refuses to open
        partition: PartitionId,
        /// What is missing
        reason: String,
    },

    /// Write attempted under a read-only transaction
    #[error("Transaction {id} is read-only")]
    ReadOnlyTransaction {
        /// Transaction id
        id: TxnId,
    },

    /// Partition is opening, splitting or closed
    #[error("Partition {partition} is not serving (state {state})")]
    PartitionNotServing {
        /// Partition id
        partition: PartitionId,
        /// State name at the time of the request
        state: String,
    },

    /// Row is outside the partition's key range
    #[error("Row {row} is outside the key range of partition {partition}")]
    RowOutOfRange {
        /// Partition id
        partition: PartitionId,
        /// Offending row
        row: RowKey,
    },

    /// Unknown partition id
    #[error("Unknown partition {0}")]
    UnknownPartition(PartitionId),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SiError {
    /// Whether the caller should retry the operation (under a new transaction)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SiError::WriteConflict { .. }
                | SiError::LockTimeout { .. }
                | SiError::PartitionNotServing { .. }
        )
    }

    /// Shorthand for `InvalidTransactionState`
    pub fn invalid_state(id: TxnId, status: TxnStatus, operation: &'static str) -> Self {
        SiError::InvalidTransactionState {
            id,
            status,
            operation,
        }
    }

    /// Shorthand for `Storage`
    pub fn storage(msg: impl Into<String>) -> Self {
        SiError::Storage(msg.into())
    }

    /// Shorthand for `Config`
    pub fn config(msg: impl Into<String>) -> Self {
        SiError::Config(msg.into())
    }
}
