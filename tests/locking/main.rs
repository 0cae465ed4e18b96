//! Row Locking Integration Tests
//!
//! Exclusive/shared row locks under contention, and the partition write
//! path's guarantee that concurrent writers never both win a row.

#[path = "../common/mod.rs"]
mod common;

mod contention;
mod lock_table;
