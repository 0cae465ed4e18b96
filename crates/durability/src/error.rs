//! Errors raised by the durable stores

use crate::frame::FrameError;
use snapkv_core::{PartitionId, SiError};
use std::io;
use thiserror::Error;

/// Result alias for durability operations
pub type DurabilityResult<T> = Result<T, DurabilityError>;

/// Failures of the partition log store and the transaction table
#[derive(Debug, Error)]
pub enum DurabilityError {
    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame in the middle of a file failed to parse
    #[error("Corrupted record at offset {offset}: {source}")]
    Corrupted {
        /// Byte offset of the bad frame
        offset: u64,
        /// Frame-level failure
        source: FrameError,
    },

    /// Invalid or foreign file header
    #[error("Invalid log header: {0}")]
    InvalidHeader(String),

    /// Record encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Record decoding failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// `create_stream` found an existing stream
    #[error("Log stream for partition {0} already exists")]
    StreamExists(PartitionId),

    /// Stream does not exist
    #[error("Log stream for partition {0} not found")]
    StreamNotFound(PartitionId),

    /// Record already present in a create-if-absent insert
    #[error("Record {0} already exists")]
    RecordExists(String),

    /// A write failed partway and the partial frame could not be removed
    #[error("Partial record left at offset {offset}: {source}")]
    TornWrite {
        /// Where the partial frame starts
        offset: u64,
        /// Failure of the truncate that should have removed it
        source: io::Error,
    },

    /// The transaction table stopped accepting writes after a torn append
    #[error("Transaction table {0} is unavailable after a failed write")]
    TableUnavailable(String),

    /// Stream was closed or removed underneath the writer
    #[error("Log stream for partition {0} is closed")]
    StreamClosed(PartitionId),
}

impl From<DurabilityError> for SiError {
    fn from(e: DurabilityError) -> Self {
        match e {
            DurabilityError::Io(io) => SiError::Io(io),
            DurabilityError::Encode(msg) | DurabilityError::Decode(msg) => {
                SiError::Serialization(msg)
            }
            other => SiError::Storage(other.to_string()),
        }
    }
}
