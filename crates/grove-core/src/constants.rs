//! Network selection and consensus constants.
//!
//! Every rule parameter the validator and mempool consult lives in
//! [`ConsensusConstants`]. Tests derive variants with struct update syntax
//! instead of mutating globals.

use serde::{Deserialize, Serialize};

use crate::types::Hash256;

/// One whole coin in base units.
pub const COIN: u64 = 1_000_000_000_000;

/// Network the node is operating on.
///
/// # Examples
///
/// ```
/// use grove_core::constants::NetworkType;
/// let net = NetworkType::default();
/// assert_eq!(net, NetworkType::Mainnet);
/// assert_eq!(net.data_dir_suffix(), "mainnet");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    /// Local regression-test network: minimal difficulty, instant blocks.
    Regtest,
}

impl NetworkType {
    /// Subdirectory name appended to the base data directory path.
    ///
    /// # Examples
    ///
    /// ```
    /// use grove_core::constants::NetworkType;
    /// assert_eq!(NetworkType::Testnet.data_dir_suffix(), "testnet");
    /// ```
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// Default consensus constants for this network.
    pub fn constants(&self) -> ConsensusConstants {
        match self {
            Self::Mainnet => ConsensusConstants::mainnet(),
            Self::Testnet => ConsensusConstants::testnet(),
            Self::Regtest => ConsensusConstants::regtest(),
        }
    }
}

/// Consensus rule parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConstants {
    pub network: NetworkType,
    /// Domain separator mixed into every signed message and reward coin parent.
    pub genesis_challenge: Hash256,
    /// Owner of the premine coin minted by the genesis block.
    pub genesis_puzzle_hash: Hash256,
    /// Value of the premine coin.
    pub genesis_premine: u64,
    pub genesis_timestamp: u64,
    /// Reward a block may mint on top of the fees it collects.
    pub block_reward: u64,
    pub min_difficulty: u64,
    /// Maximum summed cost of all spends in one block.
    pub max_block_cost: u64,
    /// Maximum cost of a single spend bundle admitted to the mempool.
    pub max_bundle_cost: u64,
    /// How far ahead of local time a block timestamp may be, in seconds.
    pub max_future_time: u64,
    pub cost_per_byte: u64,
    pub cost_agg_sig: u64,
    pub cost_create_coin: u64,
}

const MAX_BLOCK_COST: u64 = 11_000_000_000;

/// Genesis timestamp: 2025-01-01 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_735_689_600;

impl ConsensusConstants {
    pub fn mainnet() -> Self {
        Self {
            network: NetworkType::Mainnet,
            genesis_challenge: Hash256::sha256(b"grove-mainnet"),
            genesis_puzzle_hash: Hash256::sha256(b"grove-genesis-premine"),
            genesis_premine: 1_000_000 * COIN,
            genesis_timestamp: GENESIS_TIMESTAMP,
            block_reward: 2 * COIN,
            min_difficulty: 1 << 20,
            max_block_cost: MAX_BLOCK_COST,
            max_bundle_cost: MAX_BLOCK_COST / 2,
            max_future_time: 5 * 60,
            cost_per_byte: 12_000,
            cost_agg_sig: 1_200_000,
            cost_create_coin: 1_800_000,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network: NetworkType::Testnet,
            genesis_challenge: Hash256::sha256(b"grove-testnet"),
            min_difficulty: 1 << 10,
            ..Self::mainnet()
        }
    }

    /// Regtest accepts any proof (difficulty 1) so tests can mine instantly.
    pub fn regtest() -> Self {
        Self {
            network: NetworkType::Regtest,
            genesis_challenge: Hash256::sha256(b"grove-regtest"),
            min_difficulty: 1,
            ..Self::mainnet()
        }
    }
}

impl Default for ConsensusConstants {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks_have_distinct_challenges() {
        let m = ConsensusConstants::mainnet().genesis_challenge;
        let t = ConsensusConstants::testnet().genesis_challenge;
        let r = ConsensusConstants::regtest().genesis_challenge;
        assert_ne!(m, t);
        assert_ne!(t, r);
        assert_ne!(m, r);
    }

    #[test]
    fn bundle_ceiling_below_block_ceiling() {
        let c = ConsensusConstants::default();
        assert!(c.max_bundle_cost < c.max_block_cost);
    }

    #[test]
    fn network_constants_match_network() {
        for net in [NetworkType::Mainnet, NetworkType::Testnet, NetworkType::Regtest] {
            assert_eq!(net.constants().network, net);
        }
    }

    #[test]
    fn overrides_use_struct_update() {
        let c = ConsensusConstants { block_reward: 7, ..ConsensusConstants::regtest() };
        assert_eq!(c.block_reward, 7);
        assert_eq!(c.min_difficulty, 1);
    }
}
