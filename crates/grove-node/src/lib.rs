//! # grove-node: Full node: RocksDB, chain state, mempool.
//!
//! Composes the Grove subsystems into a running full node:
//! - [`storage::RocksStore`]: persistent chain storage backed by RocksDB
//! - [`blockchain::Blockchain`]: block ingestion, fork choice, and reorgs
//! - [`mempool_manager::MempoolManager`]: bundle admission and peak tracking
//! - [`node::FullNode`]: wiring, block production, and peak notifications
//! - [`config::NodeConfig`]: node configuration
//! - [`logging`]: tracing subscriber setup

pub mod blockchain;
pub mod config;
pub mod logging;
pub mod mempool_manager;
pub mod node;
pub mod storage;

pub use blockchain::{AddBlockResult, Blockchain, PeakChange};
pub use config::{MempoolConfig, NodeConfig};
pub use mempool_manager::{AddBundleResult, MempoolManager, RejectReason};
pub use node::FullNode;
pub use storage::RocksStore;
