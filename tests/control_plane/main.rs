//! Control-plane integration tests
//!
//! Kill, reaping, listing, lock statistics and metrics as seen by an
//! operator of a running database.

#[path = "../common/mod.rs"]
mod common;

mod admin;
