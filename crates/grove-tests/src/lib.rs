//! Integration test suite for Grove.
//!
//! Tests here boot full nodes (in memory or on RocksDB), produce blocks,
//! and drive the mempool through the scenarios a wallet and a farmer
//! actually hit: admission, replace-by-fee, eviction, confirmation,
//! resubmission, and reorganization.

pub mod helpers;
