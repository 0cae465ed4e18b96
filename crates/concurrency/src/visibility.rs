//! Visibility engine
//!
//! Decides, for a reading transaction, which of a row's candidate versions
//! it may see, and whether a new write collides with a concurrent writer.
//!
//! ## Rules
//!
//! A version written by `W` is visible to reader `R` when:
//!
//! 1. `W` is `R` or one of `R`'s ancestors
//! 2. otherwise `W` (and, for a dependent `W`, every ancestor it depends on)
//!    has not failed, and
//!    - `W` is ACTIVE/COMMITTING and `R` reads uncommitted, or
//!    - `W` is COMMITTED and `R` reads committed, or
//!    - `W` is COMMITTED at or before `R.start_timestamp` (snapshot)
//!
//! Among visible versions, own/ancestor writes win, then uncommitted writes
//! (newest writer first), then committed writes by commit timestamp. A
//! visible tombstone means the row is absent.

use crate::registry::TransactionLookup;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use snapkv_core::{
    CellVersion, CommitMarker, IsolationLevel, RowKey, SiError, SiResult, Timestamp, Transaction,
    TxnId, TxnStatus,
};

/// Ordering key of a visible version; larger wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Committed(Timestamp),
    Uncommitted(TxnId),
    Own(TxnId),
}

/// Visibility decisions for one reader
///
/// Writer records are memoized for the lifetime of the context, so a scan
/// over many versions by the same writers looks each writer up once.
pub struct VisibilityContext<'a> {
    reader: &'a Transaction,
    lookup: &'a dyn TransactionLookup,
    ancestors: SmallVec<[TxnId; 4]>,
    writers: FxHashMap<TxnId, Option<Transaction>>,
}

impl<'a> VisibilityContext<'a> {
    /// Build a context for `reader`, resolving its parent chain
    pub fn new(reader: &'a Transaction, lookup: &'a dyn TransactionLookup) -> SiResult<Self> {
        let mut ctx = VisibilityContext {
            reader,
            lookup,
            ancestors: SmallVec::new(),
            writers: FxHashMap::default(),
        };
        ctx.ancestors = ctx.parent_chain(reader)?;
        Ok(ctx)
    }

    /// The reading transaction
    pub fn reader(&self) -> &Transaction {
        self.reader
    }

    fn writer(&mut self, id: TxnId) -> SiResult<Option<Transaction>> {
        if let Some(known) = self.writers.get(&id) {
            return Ok(known.clone());
        }
        let found = self.lookup.lookup(id)?;
        self.writers.insert(id, found.clone());
        Ok(found)
    }

    fn parent_chain(&mut self, txn: &Transaction) -> SiResult<SmallVec<[TxnId; 4]>> {
        let mut chain = SmallVec::new();
        let mut next = txn.parent;
        while let Some(id) = next {
            chain.push(id);
            next = match self.writer(id)? {
                Some(parent) => parent.parent,
                None => None,
            };
        }
        Ok(chain)
    }

    /// True if `txn` depends (transitively) on an ancestor that failed
    fn dependency_failed(&mut self, txn: &Transaction) -> SiResult<bool> {
        let mut current = txn.clone();
        while current.dependent {
            let parent_id = match current.parent {
                Some(id) => id,
                None => break,
            };
            match self.writer(parent_id)? {
                Some(parent) if parent.status.is_failed() => return Ok(true),
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(false)
    }

    fn rank(&mut self, cell: &CellVersion) -> SiResult<Option<Rank>> {
        if cell.writer == self.reader.id || self.ancestors.contains(&cell.writer) {
            return Ok(Some(Rank::Own(cell.writer)));
        }

        let writer = match self.writer(cell.writer)? {
            Some(w) => w,
            // Record is gone; an applied version still carries its commit
            None => {
                return Ok(match cell.marker {
                    CommitMarker::Committed(ts) => self.committed_rank(ts),
                    CommitMarker::Pending => None,
                })
            }
        };

        if writer.status.is_failed() || self.dependency_failed(&writer)? {
            return Ok(None);
        }

        Ok(match writer.status {
            TxnStatus::Active | TxnStatus::Committing => {
                if self.reader.isolation == IsolationLevel::ReadUncommitted {
                    Some(Rank::Uncommitted(writer.id))
                } else {
                    None
                }
            }
            TxnStatus::Committed => {
                match writer.commit_timestamp.or_else(|| cell.commit_timestamp()) {
                    Some(ts) => self.committed_rank(ts),
                    None => None,
                }
            }
            TxnStatus::RolledBack | TxnStatus::Error => None,
        })
    }

    fn committed_rank(&self, commit_ts: Timestamp) -> Option<Rank> {
        match self.reader.isolation {
            IsolationLevel::Snapshot if commit_ts > self.reader.start_timestamp => None,
            _ => Some(Rank::Committed(commit_ts)),
        }
    }

    /// Whether a single version is visible
    pub fn is_visible(&mut self, cell: &CellVersion) -> SiResult<bool> {
        Ok(self.rank(cell)?.is_some())
    }

    /// The winning visible version among `candidates`, tombstones included
    pub fn select<'c, I>(&mut self, candidates: I) -> SiResult<Option<&'c CellVersion>>
    where
        I: IntoIterator<Item = &'c CellVersion>,
    {
        let mut best: Option<(Rank, &'c CellVersion)> = None;
        for cell in candidates {
            if let Some(rank) = self.rank(cell)? {
                if best.as_ref().map_or(true, |(r, _)| rank > *r) {
                    best = Some((rank, cell));
                }
            }
        }
        Ok(best.map(|(_, cell)| cell))
    }

    /// The visible version, or `None` if nothing is visible or it is a tombstone
    pub fn resolve<'c, I>(&mut self, candidates: I) -> SiResult<Option<&'c CellVersion>>
    where
        I: IntoIterator<Item = &'c CellVersion>,
    {
        Ok(self.select(candidates)?.filter(|cell| !cell.tombstone))
    }
}

/// Reject a write by `writer` to `row` if another transaction holds a
/// concurrent version of it
///
/// A version conflicts when its writer is neither `writer` nor one of its
/// ancestors, has not failed, and is either still ACTIVE/COMMITTING or
/// committed after `writer` started.
pub fn check_write_conflict<'c, I>(
    writer: &Transaction,
    row: &RowKey,
    existing: I,
    lookup: &dyn TransactionLookup,
) -> SiResult<()>
where
    I: IntoIterator<Item = &'c CellVersion>,
{
    let mut ctx = VisibilityContext::new(writer, lookup)?;
    for cell in existing {
        if cell.writer == writer.id || ctx.ancestors.contains(&cell.writer) {
            continue;
        }
        let conflicting = match ctx.writer(cell.writer)? {
            Some(other) => {
                if other.status.is_failed() || ctx.dependency_failed(&other)? {
                    false
                } else {
                    match other.status {
                        TxnStatus::Active | TxnStatus::Committing => true,
                        TxnStatus::Committed => other
                            .commit_timestamp
                            .or_else(|| cell.commit_timestamp())
                            .map_or(false, |ts| ts > writer.start_timestamp),
                        TxnStatus::RolledBack | TxnStatus::Error => false,
                    }
                }
            }
            None => cell
                .commit_timestamp()
                .map_or(false, |ts| ts > writer.start_timestamp),
        };
        if conflicting {
            return Err(SiError::WriteConflict {
                row: row.clone(),
                txn: writer.id,
                other: cell.writer,
            });
        }
    }
    Ok(())
}
