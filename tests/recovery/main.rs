//! Recovery Integration Tests
//!
//! Partition log replay across restarts, log append failures, and splits.

#[path = "../common/mod.rs"]
mod common;

mod log_failure;
mod restart;
mod split;
