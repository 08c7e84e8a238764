//! Core protocol types: coins, spends, bundles, blocks.
//!
//! All amounts are in mojo-style base units (u64). Cumulative chain weight
//! is u128 so that it cannot overflow on long chains.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::merkle;

/// A 32-byte hash value.
///
/// Used for coin ids, puzzle hashes, bundle names, header hashes (SHA-256)
/// and transaction roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used as the genesis block's previous hash.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA-256 of arbitrary bytes.
    pub fn sha256(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data.as_ref()).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An unspent or spent unit of value, owned by whoever can solve its puzzle.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Coin {
    /// Id of the coin whose spend created this one.
    pub parent_coin_id: Hash256,
    /// Hash of the puzzle that must be revealed to spend this coin.
    pub puzzle_hash: Hash256,
    pub amount: u64,
}

impl Coin {
    pub fn new(parent_coin_id: Hash256, puzzle_hash: Hash256, amount: u64) -> Self {
        Self { parent_coin_id, puzzle_hash, amount }
    }

    /// Coin id: `SHA-256(parent_coin_id || puzzle_hash || amount_be)`.
    pub fn coin_id(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_coin_id.as_bytes());
        hasher.update(self.puzzle_hash.as_bytes());
        hasher.update(self.amount.to_be_bytes());
        Hash256(hasher.finalize().into())
    }
}

/// Store-side view of a coin: when it was created and whether it was spent.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CoinRecord {
    pub coin: Coin,
    /// Height of the block that created the coin.
    pub confirmed_height: u64,
    /// Height of the block that spent the coin, if any.
    pub spent_height: Option<u64>,
    /// Whether the coin is a block reward.
    pub coinbase: bool,
    /// Timestamp of the confirming block.
    pub timestamp: u64,
}

impl CoinRecord {
    pub fn is_spent(&self) -> bool {
        self.spent_height.is_some()
    }

    pub fn coin_id(&self) -> Hash256 {
        self.coin.coin_id()
    }
}

/// Output of running a coin's puzzle with its solution.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum Condition {
    /// Create a child coin of this coin.
    CreateCoin { puzzle_hash: Hash256, amount: u64 },
    /// Require that the bundle leaves at least this much as fee.
    ReserveFee(u64),
    /// Not valid before this block height.
    AssertHeightAbsolute(u64),
    /// Not valid before this timestamp.
    AssertSecondsAbsolute(u64),
}

/// A single coin spend: the coin, the revealed puzzle, and its solution.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CoinSpend {
    pub coin: Coin,
    pub puzzle_reveal: Vec<u8>,
    pub solution: Vec<u8>,
}

/// An atomic set of coin spends authorized by one aggregated BLS signature.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct SpendBundle {
    pub coin_spends: Vec<CoinSpend>,
    /// 96-byte aggregated BLS signature.
    pub aggregated_signature: Vec<u8>,
}

impl SpendBundle {
    pub fn new(coin_spends: Vec<CoinSpend>, aggregated_signature: Vec<u8>) -> Self {
        Self { coin_spends, aggregated_signature }
    }

    /// Content hash identifying this bundle.
    ///
    /// SHA-256 over a length-prefixed layout: spend count, then for each spend
    /// `coin_id || len || puzzle_reveal || len || solution`, then the signature.
    /// Lengths are u32 big-endian.
    pub fn name(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update((self.coin_spends.len() as u32).to_be_bytes());
        for spend in &self.coin_spends {
            hasher.update(spend.coin.coin_id().as_bytes());
            hasher.update((spend.puzzle_reveal.len() as u32).to_be_bytes());
            hasher.update(&spend.puzzle_reveal);
            hasher.update((spend.solution.len() as u32).to_be_bytes());
            hasher.update(&spend.solution);
        }
        hasher.update((self.aggregated_signature.len() as u32).to_be_bytes());
        hasher.update(&self.aggregated_signature);
        Hash256(hasher.finalize().into())
    }

    /// Coins consumed by this bundle.
    pub fn removals(&self) -> impl Iterator<Item = &Coin> {
        self.coin_spends.iter().map(|s| &s.coin)
    }

    /// Ids of the coins consumed by this bundle.
    pub fn removal_ids(&self) -> Vec<Hash256> {
        self.removals().map(Coin::coin_id).collect()
    }
}

/// Block header carrying the chain linkage and proof-of-work.
///
/// Hash is double SHA-256 over a fixed little-endian byte layout.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub prev_hash: Hash256,
    /// Cumulative chain weight including this block.
    pub weight: u128,
    /// Weight contributed by this block; also the proof target divisor.
    pub difficulty: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// BLAKE3 Merkle root over the block's spent and reward coin ids.
    pub transactions_root: Hash256,
    pub nonce: u64,
}

impl BlockHeader {
    const HASH_SIZE: usize = 5 * 8 + 16 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Layout: version || height || prev_hash || weight || difficulty ||
    /// timestamp || transactions_root || nonce, integers little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(&self.weight.to_le_bytes());
        data.extend_from_slice(&self.difficulty.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(self.transactions_root.as_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header, reward coins, and the spends it confirms.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Coins minted by this block (farmer reward plus collected fees).
    pub reward_coins: Vec<Coin>,
    /// Spends of every bundle included in the block, flattened.
    pub coin_spends: Vec<CoinSpend>,
    /// Aggregate of every included bundle's signature.
    pub aggregated_signature: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Ids of all coins spent by this block.
    pub fn removal_ids(&self) -> Vec<Hash256> {
        self.coin_spends.iter().map(|s| s.coin.coin_id()).collect()
    }

    /// Merkle root committing to the spent coin ids followed by reward coin ids.
    pub fn compute_transactions_root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self
            .coin_spends
            .iter()
            .map(|s| s.coin.coin_id())
            .chain(self.reward_coins.iter().map(Coin::coin_id))
            .collect();
        merkle::merkle_root(&leaves)
    }

    /// The spends of this block viewed as a single bundle.
    pub fn as_spend_bundle(&self) -> SpendBundle {
        SpendBundle::new(self.coin_spends.clone(), self.aggregated_signature.clone())
    }
}

/// Ancestry metadata of a stored block, enough for fork choice.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockRecord {
    pub header_hash: Hash256,
    pub prev_hash: Hash256,
    pub height: u64,
    pub weight: u128,
    pub difficulty: u64,
    pub timestamp: u64,
}

impl BlockRecord {
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            header_hash: header.hash(),
            prev_hash: header.prev_hash,
            height: header.height,
            weight: header.weight,
            difficulty: header.difficulty,
            timestamp: header.timestamp,
        }
    }
}
