//! Snapshot Isolation Integration Tests
//!
//! Visibility of committed, uncommitted and rolled-back writes across
//! isolation levels, nested transactions and multiple partitions.

#[path = "../common/mod.rs"]
mod common;

mod isolation_levels;
mod nested;
mod scenarios;
