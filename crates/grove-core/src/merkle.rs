//! BLAKE3 Merkle root committing to a block's coin ids.
//!
//! Domain-separated hashing:
//! - Leaf: `BLAKE3(0x00 || id)`
//! - Node: `BLAKE3(0x01 || left || right)`
//!
//! Odd layers duplicate their last element. An empty list yields [`Hash256::ZERO`].

use crate::types::Hash256;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(data.as_bytes());
    Hash256(hasher.finalize().into())
}

pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Merkle root over `leaves` in the given order.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }
    let mut layer: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    layer[0]
}
