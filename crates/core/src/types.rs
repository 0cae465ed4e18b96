//! Identifier types shared by every layer
//!
//! - `Timestamp`: a point on the global logical clock issued by the oracle
//! - `TxnId`: transaction identity (equal to the transaction's start timestamp)
//! - `PartitionId`: identity of a key-range shard
//! - `RowKey`: opaque, byte-ordered row identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timestamp issued by the timestamp oracle
///
/// Timestamps are strictly increasing and never reused. They carry no
/// wall-clock meaning; visibility is decided purely by comparing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The smallest timestamp, before anything the oracle ever issues
    pub const ZERO: Timestamp = Timestamp(0);

    /// Raw counter value
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The timestamp immediately after this one
    #[inline]
    pub fn next(&self) -> Timestamp {
        Timestamp(self.0 + 1)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

/// Transaction identifier
///
/// A transaction's id is the start timestamp it was issued at begin, so ids
/// order the same way start timestamps do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Raw id value
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The start timestamp this id was derived from
    #[inline]
    pub fn start_timestamp(&self) -> Timestamp {
        Timestamp(self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

impl From<Timestamp> for TxnId {
    fn from(ts: Timestamp) -> Self {
        TxnId(ts.0)
    }
}

/// Partition identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    /// Raw id value
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Row identity within a table
///
/// Rows compare bytewise, which is also the order partitions split on.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub Vec<u8>);

impl RowKey {
    /// Create a row key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        RowKey(bytes.into())
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty key (also used as an open range bound)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for RowKey {
    fn from(b: &[u8]) -> Self {
        RowKey(b.to_vec())
    }
}

impl From<Vec<u8>> for RowKey {
    fn from(b: Vec<u8>) -> Self {
        RowKey(b)
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({})", self)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{:?}", s),
            _ => {
                write!(f, "0x")?;
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Half-open key range `[start, end)` owned by a partition
///
/// An empty `end` means the range is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub start: RowKey,
    /// Exclusive upper bound (empty = unbounded)
    pub end: RowKey,
}

impl KeyRange {
    /// Create a range
    pub fn new(start: impl Into<RowKey>, end: impl Into<RowKey>) -> Self {
        KeyRange {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The whole key space
    pub fn unbounded() -> Self {
        KeyRange {
            start: RowKey::default(),
            end: RowKey::default(),
        }
    }

    /// Whether `row` falls inside this range
    pub fn contains(&self, row: &RowKey) -> bool {
        row >= &self.start && (self.end.is_empty() || row < &self.end)
    }

    /// Split into `[start, key)` and `[key, end)`
    ///
    /// Returns `None` unless `key` lies strictly inside the range.
    pub fn split_at(&self, key: &RowKey) -> Option<(KeyRange, KeyRange)> {
        if key <= &self.start || !self.contains(key) {
            return None;
        }
        Some((
            KeyRange {
                start: self.start.clone(),
                end: key.clone(),
            },
            KeyRange {
                start: key.clone(),
                end: self.end.clone(),
            },
        ))
    }
}

impl Default for RowKey {
    fn default() -> Self {
        RowKey(Vec::new())
    }
}
