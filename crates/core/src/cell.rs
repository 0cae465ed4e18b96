//! Cell versions and buffered writes

use crate::types::{RowKey, Timestamp, TxnId};
use serde::{Deserialize, Serialize};

/// Writer marker carried by a cell version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitMarker {
    /// Writer has not been resolved yet; status must be looked up
    Pending,
    /// Writer committed at this timestamp
    Committed(Timestamp),
}

/// A single version of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellVersion {
    /// Row this version belongs to
    pub row: RowKey,
    /// Transaction that wrote the version
    pub writer: TxnId,
    /// Commit state as known when the version was produced
    pub marker: CommitMarker,
    /// Value bytes (empty for tombstones)
    pub value: Vec<u8>,
    /// Logical deletion marker
    pub tombstone: bool,
}

impl CellVersion {
    /// A pending (not yet applied) version
    pub fn pending(row: RowKey, writer: TxnId, op: &WriteOp) -> Self {
        let (value, tombstone) = match op {
            WriteOp::Put(v) => (v.clone(), false),
            WriteOp::Delete => (Vec::new(), true),
        };
        CellVersion {
            row,
            writer,
            marker: CommitMarker::Pending,
            value,
            tombstone,
        }
    }

    /// A version applied to the base store at `commit_ts`
    pub fn committed(row: RowKey, writer: TxnId, commit_ts: Timestamp, op: &WriteOp) -> Self {
        let mut cell = Self::pending(row, writer, op);
        cell.marker = CommitMarker::Committed(commit_ts);
        cell
    }

    /// Commit timestamp recorded on the version, if any
    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        match self.marker {
            CommitMarker::Committed(ts) => Some(ts),
            CommitMarker::Pending => None,
        }
    }
}

/// Mutation buffered by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or overwrite the row
    Put(Vec<u8>),
    /// Logically delete the row
    Delete,
}

impl WriteOp {
    /// True for deletes
    pub fn is_delete(&self) -> bool {
        matches!(self, WriteOp::Delete)
    }
}

/// One entry of a transaction's per-partition write buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedWrite {
    /// Writing transaction
    pub txn_id: TxnId,
    /// Target row
    pub row: RowKey,
    /// Mutation
    pub op: WriteOp,
}

impl BufferedWrite {
    /// Create a buffered write
    pub fn new(txn_id: TxnId, row: RowKey, op: WriteOp) -> Self {
        BufferedWrite { txn_id, row, op }
    }

    /// View the buffered write as a pending cell version
    pub fn to_pending_cell(&self) -> CellVersion {
        CellVersion::pending(self.row.clone(), self.txn_id, &self.op)
    }
}
