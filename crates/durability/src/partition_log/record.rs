//! Records written to a partition's transaction log

use crate::error::{DurabilityError, DurabilityResult};
use serde::{Deserialize, Serialize};
use snapkv_core::{BufferedWrite, PartitionId, RowKey, TxnId};

/// Which half of a split a child partition received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitSide {
    /// Rows strictly below the split key
    Left,
    /// Rows at or above the split key
    Right,
}

/// How a transaction's buffered writes left the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Writes were applied to the base store at commit
    Applied,
    /// Writes were dropped because the transaction failed
    Discarded,
}

/// A single entry in a partition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A write accepted into a transaction's buffer
    WriteBuffered(BufferedWrite),

    /// The transaction's buffer was resolved; it no longer survives replay
    TxnResolved {
        /// Resolved transaction
        txn_id: TxnId,
        /// Applied or discarded
        outcome: Resolution,
    },

    /// The parent partition was split at `split_key`
    SplitBoundary {
        /// First row of the right child
        split_key: RowKey,
        /// Child owning `[start, split_key)`
        left: PartitionId,
        /// Child owning `[split_key, end)`
        right: PartitionId,
    },

    /// A recorded split did not complete; its boundary no longer applies
    SplitAborted {
        /// Left child named by the abandoned boundary
        left: PartitionId,
        /// Right child named by the abandoned boundary
        right: PartitionId,
    },

    /// Buffered writes inherited from a split parent
    SplitMigrated {
        /// Parent partition
        parent: PartitionId,
        /// Half this child received
        side: SplitSide,
        /// Inherited writes, in parent log order
        writes: Vec<BufferedWrite>,
    },

    /// The log accepts no further records
    Sealed,
}

impl LogRecord {
    /// Serialize with MessagePack
    pub fn to_bytes(&self) -> DurabilityResult<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| DurabilityError::Encode(e.to_string()))
    }

    /// Deserialize from MessagePack
    pub fn from_bytes(bytes: &[u8]) -> DurabilityResult<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| DurabilityError::Decode(e.to_string()))
    }

    /// Short name for tracing
    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::WriteBuffered(_) => "write_buffered",
            LogRecord::TxnResolved { .. } => "txn_resolved",
            LogRecord::SplitBoundary { .. } => "split_boundary",
            LogRecord::SplitAborted { .. } => "split_aborted",
            LogRecord::SplitMigrated { .. } => "split_migrated",
            LogRecord::Sealed => "sealed",
        }
    }
}
