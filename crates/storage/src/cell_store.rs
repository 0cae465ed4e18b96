//! Versioned cell store
//!
//! The last-writer-wins substrate the transaction layer sits on. It only ever
//! holds committed versions: partitions buffer in-flight writes themselves and
//! apply them here, stamped with the commit timestamp, once the registry says
//! the writer committed.

use parking_lot::RwLock;
use snapkv_core::{CellVersion, RowKey, SiError, SiResult, Timestamp};
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::debug;

use crate::version_chain::VersionChain;

/// Range-addressable store of committed cell versions
///
/// Implementations must be safe to share between partitions and threads.
pub trait CellStore: Send + Sync {
    /// All committed versions of `row`, newest commit first
    fn versions(&self, row: &RowKey) -> SiResult<Vec<CellVersion>>;

    /// Apply committed versions
    ///
    /// Every cell must carry a `CommitMarker::Committed`. Applying the same
    /// writer's version for a row again replaces it.
    fn apply(&self, cells: Vec<CellVersion>) -> SiResult<usize>;

    /// Rows with at least one version in `[start, end)` (empty end = unbounded)
    fn rows_in_range(&self, start: &RowKey, end: &RowKey) -> SiResult<Vec<RowKey>>;

    /// Drop versions not needed by readers at or after `horizon`
    fn gc(&self, horizon: Timestamp) -> SiResult<usize>;
}

/// In-memory `CellStore` backed by a `BTreeMap` behind a `parking_lot::RwLock`
#[derive(Debug, Default)]
pub struct MemoryCellStore {
    data: RwLock<BTreeMap<RowKey, VersionChain>>,
}

impl MemoryCellStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows with at least one version
    pub fn row_count(&self) -> usize {
        self.data.read().len()
    }

    /// Latest committed version of `row`
    pub fn latest(&self, row: &RowKey) -> Option<CellVersion> {
        self.data.read().get(row).and_then(|c| c.latest().cloned())
    }
}

impl CellStore for MemoryCellStore {
    fn versions(&self, row: &RowKey) -> SiResult<Vec<CellVersion>> {
        Ok(self
            .data
            .read()
            .get(row)
            .map(|chain| chain.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn apply(&self, cells: Vec<CellVersion>) -> SiResult<usize> {
        if let Some(bad) = cells.iter().find(|c| c.commit_timestamp().is_none()) {
            return Err(SiError::storage(format!(
                "cannot apply uncommitted version of row {} by {}",
                bad.row, bad.writer
            )));
        }
        let count = cells.len();
        let mut data = self.data.write();
        for cell in cells {
            data.entry(cell.row.clone()).or_default().insert(cell);
        }
        debug!(target: "snapkv::storage", count, "Applied committed versions");
        Ok(count)
    }

    fn rows_in_range(&self, start: &RowKey, end: &RowKey) -> SiResult<Vec<RowKey>> {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else if end <= start {
            return Ok(Vec::new());
        } else {
            Bound::Excluded(end)
        };
        Ok(self
            .data
            .read()
            .range::<RowKey, _>((Bound::Included(start), upper))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn gc(&self, horizon: Timestamp) -> SiResult<usize> {
        let mut removed = 0;
        let mut data = self.data.write();
        for chain in data.values_mut() {
            let before = chain.len();
            chain.gc(horizon);
            removed += before - chain.len();
        }
        Ok(removed)
    }
}
