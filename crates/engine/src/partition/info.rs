//! Partition identity, table kinds and lifecycle states

use serde::{Deserialize, Serialize};
use snapkv_core::{KeyRange, PartitionId, RowKey};
use std::fmt;

/// How a table's rows participate in transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Ordinary user table: locked, buffered, snapshot isolated
    User,
    /// Secondary index of a user table; same rules as `User`
    UserIndex,
    /// Catalog/system table: writes apply immediately as auto-committed
    /// versions, reads still honor snapshot visibility
    System,
    /// No transactional semantics: last writer wins, reads see the latest
    NonTransactional,
}

impl TableKind {
    /// Whether writes go through locking, buffering and the log
    pub fn is_transactional(&self) -> bool {
        matches!(self, TableKind::User | TableKind::UserIndex)
    }
}

/// Lifecycle state of a partition
///
/// ```text
/// OPENING ──▶ OPEN ──▶ SPLITTING ──▶ CLOSED
///               │                      ▲
///               └──────── close() ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Replaying its log; not serving
    Opening,
    /// Serving reads and writes
    Open,
    /// Draining in-flight requests before bisecting the log
    Splitting,
    /// Not serving
    Closed,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionState::Opening => "OPENING",
            PartitionState::Open => "OPEN",
            PartitionState::Splitting => "SPLITTING",
            PartitionState::Closed => "CLOSED",
        })
    }
}

/// Durable description of a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Partition id
    pub id: PartitionId,
    /// Owning table
    pub table: String,
    /// Table kind
    pub kind: TableKind,
    /// Owned key range
    pub range: KeyRange,
    /// Split parent, for children created by a split
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PartitionId>,
}

impl PartitionInfo {
    /// Describe a new top-level partition
    pub fn new(id: PartitionId, table: impl Into<String>, kind: TableKind, range: KeyRange) -> Self {
        PartitionInfo {
            id,
            table: table.into(),
            kind,
            range,
            parent: None,
        }
    }

    /// Whether `row` belongs to this partition
    pub fn owns(&self, row: &RowKey) -> bool {
        self.range.contains(row)
    }
}
