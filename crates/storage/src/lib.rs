//! Storage layer for snapkv
//!
//! The committed-version substrate underneath the transaction layer:
//! - VersionChain: newest-first committed versions of one row
//! - CellStore: range-addressable store of version chains
//! - MemoryCellStore: BTreeMap + RwLock implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell_store;
pub mod version_chain;

pub use cell_store::{CellStore, MemoryCellStore};
pub use version_chain::VersionChain;
