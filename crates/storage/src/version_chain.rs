//! Per-row version chain
//!
//! Versions are kept newest-first by commit timestamp, so a snapshot read
//! stops at the first version it is allowed to see.

use snapkv_core::{CellVersion, Timestamp};
use std::collections::VecDeque;

/// Committed versions of a single row, newest commit first
///
/// Uses VecDeque so the common case (a newer commit) is an O(1) push_front.
/// Partitions may apply commits out of timestamp order, in which case the
/// version is inserted at its sorted position.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<CellVersion>,
}

impl VersionChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            versions: VecDeque::with_capacity(4),
        }
    }

    /// Insert a committed version
    ///
    /// Re-applying the same writer's version replaces it rather than adding
    /// a duplicate, so applying a transaction twice is harmless.
    pub fn insert(&mut self, cell: CellVersion) {
        let ts = cell.commit_timestamp().unwrap_or(Timestamp::ZERO);
        if let Some(pos) = self.versions.iter().position(|v| v.writer == cell.writer) {
            self.versions.remove(pos);
        }
        let pos = self
            .versions
            .iter()
            .position(|v| v.commit_timestamp().unwrap_or(Timestamp::ZERO) <= ts)
            .unwrap_or(self.versions.len());
        if pos == 0 {
            self.versions.push_front(cell);
        } else {
            self.versions.insert(pos, cell);
        }
    }

    /// Latest committed version
    #[inline]
    pub fn latest(&self) -> Option<&CellVersion> {
        self.versions.front()
    }

    /// All versions, newest first
    pub fn iter(&self) -> impl Iterator<Item = &CellVersion> {
        self.versions.iter()
    }

    /// Drop versions older than `horizon`, always keeping the newest one
    /// at or before it
    pub fn gc(&mut self, horizon: Timestamp) {
        let keep = self
            .versions
            .iter()
            .position(|v| v.commit_timestamp().map(|c| c <= horizon).unwrap_or(false));
        if let Some(idx) = keep {
            self.versions.truncate(idx + 1);
        }
    }

    /// Number of versions stored
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
