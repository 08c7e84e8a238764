//! Genesis block construction.
//!
//! The genesis block is fully determined by the network constants: it
//! mints a single premine coin, spends nothing, and has difficulty and
//! weight 1. Nodes build it locally and never accept a different one.

use grove_core::constants::ConsensusConstants;
use grove_core::crypto::empty_signature;
use grove_core::types::{Block, BlockHeader, Coin, Hash256};

use crate::engine::{reward_parent, BLOCK_VERSION};

/// Build the genesis block for `constants`.
pub fn genesis_block(constants: &ConsensusConstants) -> Block {
    let premine = Coin::new(
        reward_parent(&constants.genesis_challenge, 0),
        constants.genesis_puzzle_hash,
        constants.genesis_premine,
    );
    let mut block = Block {
        header: BlockHeader {
            version: BLOCK_VERSION,
            height: 0,
            prev_hash: Hash256::ZERO,
            weight: 1,
            difficulty: 1,
            timestamp: constants.genesis_timestamp,
            transactions_root: Hash256::ZERO,
            nonce: 0,
        },
        reward_coins: vec![premine],
        coin_spends: vec![],
        aggregated_signature: empty_signature(),
    };
    block.header.transactions_root = block.compute_transactions_root();
    block
}

pub fn genesis_hash(constants: &ConsensusConstants) -> Hash256 {
    genesis_block(constants).hash()
}
