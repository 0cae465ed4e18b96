//! Core types for snapkv
//!
//! This crate defines the foundational types used throughout the system:
//! - Timestamp, TxnId, PartitionId, RowKey, KeyRange: identifiers
//! - Transaction, TxnStatus, IsolationLevel, TransactionOptions: transaction records
//! - CellVersion, CommitMarker, WriteOp, BufferedWrite: row versions and buffered writes
//! - SiError: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod error;
pub mod transaction;
pub mod types;

pub use cell::{BufferedWrite, CellVersion, CommitMarker, WriteOp};
pub use error::{SiError, SiResult};
pub use transaction::{IsolationLevel, Transaction, TransactionOptions, TxnStatus};
pub use types::{KeyRange, PartitionId, RowKey, Timestamp, TxnId};
