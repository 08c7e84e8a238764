//! # grove-core
//! Foundation types, store traits, and pool structures for a Grove full node.

pub mod block_store;
pub mod chain_state;
pub mod coin_store;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod seen;
pub mod traits;
pub mod types;
