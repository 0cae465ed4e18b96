//! Range scanner

use snapkv_core::{CellVersion, RowKey};

/// Visible rows of a range, in key order
///
/// The scanner is materialized when opened: it reflects what the reading
/// transaction could see at that moment and holds no locks afterwards.
#[derive(Debug)]
pub struct Scanner {
    rows: std::vec::IntoIter<(RowKey, CellVersion)>,
}

impl Scanner {
    pub(crate) fn new(rows: Vec<(RowKey, CellVersion)>) -> Self {
        Scanner {
            rows: rows.into_iter(),
        }
    }

    /// Rows not yet returned
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for Scanner {
    type Item = (RowKey, CellVersion);

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Scanner {}
