//! Per-transaction write buffers

use snapkv_core::{BufferedWrite, CellVersion, RowKey, Timestamp, TxnId, WriteOp};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Writes a transaction has made at one partition and not yet resolved
///
/// Writes are kept in submission order for the log and for replay; the
/// latest write per row is what readers and the commit see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    txn_id: TxnId,
    writes: Vec<BufferedWrite>,
    latest: BTreeMap<RowKey, usize>,
}

impl TransactionState {
    /// Empty buffer for `txn_id`
    pub fn new(txn_id: TxnId) -> Self {
        TransactionState {
            txn_id,
            writes: Vec::new(),
            latest: BTreeMap::new(),
        }
    }

    /// Rebuild from replayed writes
    pub fn from_writes(txn_id: TxnId, writes: Vec<BufferedWrite>) -> Self {
        let mut state = Self::new(txn_id);
        for write in writes {
            state.push(write);
        }
        state
    }

    /// Owning transaction
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Append a write
    pub fn push(&mut self, write: BufferedWrite) {
        self.latest.insert(write.row.clone(), self.writes.len());
        self.writes.push(write);
    }

    /// Latest operation buffered for `row`
    pub fn latest(&self, row: &RowKey) -> Option<&WriteOp> {
        self.latest.get(row).map(|&i| &self.writes[i].op)
    }

    /// Latest operation per row within `[start, end)` (empty end = unbounded)
    pub fn rows_in<'a>(
        &'a self,
        start: &RowKey,
        end: &RowKey,
    ) -> impl Iterator<Item = (&'a RowKey, &'a WriteOp)> + 'a {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else if end < start {
            // Inverted range: empty, without tripping BTreeMap's range check
            Bound::Excluded(start.clone())
        } else {
            Bound::Excluded(end.clone())
        };
        self.latest
            .range((Bound::Included(start.clone()), upper))
            .map(move |(row, &i)| (row, &self.writes[i].op))
    }

    /// All writes in submission order
    pub fn writes(&self) -> &[BufferedWrite] {
        &self.writes
    }

    /// Number of writes buffered
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Committed versions to apply, one per row
    pub fn to_committed_cells(&self, commit_ts: Timestamp) -> Vec<CellVersion> {
        self.latest
            .iter()
            .map(|(row, &i)| {
                CellVersion::committed(row.clone(), self.txn_id, commit_ts, &self.writes[i].op)
            })
            .collect()
    }
}
