//! Replay and split of partition logs
//!
//! Both operations are pure functions over a record sequence. Replay rebuilds
//! the set of unresolved transaction buffers; bisection divides those buffers
//! by row at a split key. Splitting a log is `bisect(replay(log))`, which
//! keeps the two halves lossless and disjoint: every unresolved write ends up
//! in exactly one child, in its original order.

use super::record::{LogRecord, SplitSide};
use snapkv_core::{BufferedWrite, PartitionId, RowKey, TxnId};
use std::collections::BTreeMap;

/// Unresolved write buffers, keyed by transaction
pub type TxnBuffers = BTreeMap<TxnId, Vec<BufferedWrite>>;

/// Split recorded in a parent log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPoint {
    /// First row of the right child
    pub split_key: RowKey,
    /// Left child
    pub left: PartitionId,
    /// Right child
    pub right: PartitionId,
}

impl SplitPoint {
    /// Which side `child` received, if it is one of the children
    pub fn side_of(&self, child: PartitionId) -> Option<SplitSide> {
        if child == self.left {
            Some(SplitSide::Left)
        } else if child == self.right {
            Some(SplitSide::Right)
        } else {
            None
        }
    }
}

/// State reconstructed from a log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayState {
    /// Buffers of transactions with no `TxnResolved` record
    pub buffers: TxnBuffers,
    /// Split boundary, if this partition was split
    pub split: Option<SplitPoint>,
    /// Parents this partition inherited writes from
    pub migrated_from: Vec<(PartitionId, SplitSide)>,
    /// The log was sealed
    pub sealed: bool,
}

impl ReplayState {
    /// Total number of unresolved writes
    pub fn pending_writes(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }
}

/// Rebuild unresolved transaction buffers from log records
pub fn replay(records: &[LogRecord]) -> ReplayState {
    let mut state = ReplayState::default();
    for record in records {
        match record {
            LogRecord::WriteBuffered(write) => {
                state
                    .buffers
                    .entry(write.txn_id)
                    .or_default()
                    .push(write.clone());
            }
            LogRecord::TxnResolved { txn_id, .. } => {
                state.buffers.remove(txn_id);
            }
            LogRecord::SplitBoundary {
                split_key,
                left,
                right,
            } => {
                state.split = Some(SplitPoint {
                    split_key: split_key.clone(),
                    left: *left,
                    right: *right,
                });
            }
            LogRecord::SplitAborted { left, right } => {
                let abandoned = state
                    .split
                    .as_ref()
                    .map_or(false, |s| s.left == *left && s.right == *right);
                if abandoned {
                    state.split = None;
                    state.sealed = false;
                }
            }
            LogRecord::SplitMigrated {
                parent,
                side,
                writes,
            } => {
                state.migrated_from.push((*parent, *side));
                for write in writes {
                    state
                        .buffers
                        .entry(write.txn_id)
                        .or_default()
                        .push(write.clone());
                }
            }
            LogRecord::Sealed => state.sealed = true,
        }
    }
    state
}

/// Divide buffers at `split_key`: rows below go left, the rest go right
///
/// Transactions whose writes all land on one side do not appear on the other.
pub fn bisect(buffers: &TxnBuffers, split_key: &RowKey) -> (TxnBuffers, TxnBuffers) {
    let mut left = TxnBuffers::new();
    let mut right = TxnBuffers::new();
    for (txn_id, writes) in buffers {
        let (lo, hi): (Vec<_>, Vec<_>) = writes
            .iter()
            .cloned()
            .partition(|w| &w.row < split_key);
        if !lo.is_empty() {
            left.insert(*txn_id, lo);
        }
        if !hi.is_empty() {
            right.insert(*txn_id, hi);
        }
    }
    (left, right)
}

/// The two halves of a split log, flattened in transaction order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitHalves {
    /// Writes with row < split key
    pub left: Vec<BufferedWrite>,
    /// Writes with row >= split key
    pub right: Vec<BufferedWrite>,
}

/// Split a log's unresolved writes at `split_key`
pub fn split_log(records: &[LogRecord], split_key: &RowKey) -> SplitHalves {
    let state = replay(records);
    let (left, right) = bisect(&state.buffers, split_key);
    SplitHalves {
        left: flatten(left),
        right: flatten(right),
    }
}

fn flatten(buffers: TxnBuffers) -> Vec<BufferedWrite> {
    buffers.into_values().flatten().collect()
}

/// Check that a child log carries the half its parent assigned to it
///
/// A parent that recorded a split naming `child` requires a matching
/// `SplitMigrated` record in the child's log. Returns a description of the
/// mismatch on failure.
pub fn check_split_consistency(
    parent: PartitionId,
    parent_records: &[LogRecord],
    child: PartitionId,
    child_records: &[LogRecord],
) -> Result<(), String> {
    let parent_state = replay(parent_records);
    let side = match parent_state.split.as_ref().and_then(|s| s.side_of(child)) {
        Some(side) => side,
        None => return Ok(()),
    };
    let migrated = child_records.iter().any(|r| {
        matches!(r, LogRecord::SplitMigrated { parent: p, side: s, .. } if *p == parent && *s == side)
    });
    if migrated {
        Ok(())
    } else {
        Err(format!(
            "parent {} recorded a split assigning the {:?} half to {}, but the child log has no migrated writes",
            parent, side, child
        ))
    }
}
