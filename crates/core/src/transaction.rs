//! Transaction record and lifecycle types
//!
//! A `Transaction` is owned by the transaction registry. Every other holder
//! (caches, visibility checks, partitions) works on a cloned snapshot and
//! never mutates it in place.
//!
//! ## Lifecycle
//!
//! ```text
//!            commit()                 commit() persisted
//! ACTIVE ──────────────▶ COMMITTING ─────────────────────▶ COMMITTED
//!   │                        │
//!   │ rollback()/kill()      │ rollback()/kill()
//!   ▼                        ▼
//! ROLLED_BACK ◀──────────── ERROR ◀── mark_error() (log append failure)
//! ```

use crate::types::{Timestamp, TxnId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation level used for reads made by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IsolationLevel {
    /// Sees uncommitted writes of active transactions
    ReadUncommitted,
    /// Sees anything committed before the read executes
    ReadCommitted,
    /// Sees only what was committed before the transaction started
    #[default]
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationLevel::ReadUncommitted => "READ_UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::Snapshot => "SNAPSHOT",
        };
        f.write_str(s)
    }
}

/// Status of a transaction in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Running; may read and write
    Active,
    /// Commit timestamp allocated, COMMITTED not yet durable
    Committing,
    /// Durably committed
    Committed,
    /// Rolled back; all writes permanently invisible
    RolledBack,
    /// Failed (e.g. log append failure); must be rolled back
    Error,
}

impl TxnStatus {
    /// COMMITTED and ROLLED_BACK accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::RolledBack)
    }

    /// ROLLED_BACK or ERROR: writes under this status are never visible
    pub fn is_failed(&self) -> bool {
        matches!(self, TxnStatus::RolledBack | TxnStatus::Error)
    }

    /// ACTIVE or COMMITTING: outcome still open
    pub fn is_pending(&self) -> bool {
        matches!(self, TxnStatus::Active | TxnStatus::Committing)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::Active => "ACTIVE",
            TxnStatus::Committing => "COMMITTING",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::RolledBack => "ROLLED_BACK",
            TxnStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Options supplied to `begin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Parent transaction for nested transactions
    pub parent: Option<TxnId>,
    /// Whether the outcome depends on the parent's outcome
    pub dependent: bool,
    /// Read-write (true) or read-only (false)
    pub allow_writes: bool,
    /// Isolation level for reads
    pub isolation: IsolationLevel,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            parent: None,
            dependent: false,
            allow_writes: true,
            isolation: IsolationLevel::Snapshot,
        }
    }
}

impl TransactionOptions {
    /// Read-write snapshot transaction with no parent
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only transaction
    pub fn read_only() -> Self {
        TransactionOptions {
            allow_writes: false,
            ..Self::default()
        }
    }

    /// Set the isolation level (builder pattern)
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Nest under `parent`; `dependent` ties visibility to the parent's outcome
    pub fn with_parent(mut self, parent: TxnId, dependent: bool) -> Self {
        self.parent = Some(parent);
        self.dependent = dependent;
        self
    }

    /// Set read-write flag (builder pattern)
    pub fn with_writes(mut self, allow_writes: bool) -> Self {
        self.allow_writes = allow_writes;
        self
    }
}

/// Durable transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique id (equal to `start_timestamp`)
    pub id: TxnId,
    /// Snapshot point for SNAPSHOT reads
    pub start_timestamp: Timestamp,
    /// Set once a commit timestamp has been allocated
    pub commit_timestamp: Option<Timestamp>,
    /// Current lifecycle status
    pub status: TxnStatus,
    /// Parent transaction, for nested transactions
    pub parent: Option<TxnId>,
    /// Visibility depends on the parent chain not failing
    pub dependent: bool,
    /// Read-write vs read-only
    pub allow_writes: bool,
    /// Isolation level for reads
    pub isolation: IsolationLevel,
    /// Last liveness renewal, milliseconds since the Unix epoch
    pub keep_alive_millis: i64,
}

impl Transaction {
    /// Build a fresh ACTIVE record
    pub fn new(start: Timestamp, options: &TransactionOptions, now_millis: i64) -> Self {
        Transaction {
            id: TxnId::from(start),
            start_timestamp: start,
            commit_timestamp: None,
            status: TxnStatus::Active,
            parent: options.parent,
            dependent: options.dependent,
            allow_writes: options.allow_writes,
            isolation: options.isolation,
            keep_alive_millis: now_millis,
        }
    }

    /// True while the transaction may still read and write
    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }

    /// Commit timestamp, only once the record is COMMITTED
    pub fn effective_commit_timestamp(&self) -> Option<Timestamp> {
        match self.status {
            TxnStatus::Committed => self.commit_timestamp,
            _ => None,
        }
    }
}
