//! Shared test helpers for integration and scenario tests.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use grove_consensus::{mine_block, standard_solution, ConsensusEngine};
use grove_core::constants::{ConsensusConstants, NetworkType};
use grove_core::crypto::{aggregate_signatures, KeyPair};
use grove_core::traits::{BundleConditions, ConsensusValidator};
use grove_core::types::{Block, BlockRecord, Coin, CoinSpend, Condition, Hash256, SpendBundle};
use grove_node_lib::blockchain::{peak_view, SharedChainDb};
use grove_node_lib::{FullNode, MempoolConfig, NodeConfig, RocksStore};

/// Seconds past genesis the fixed test clock reads.
pub const CLOCK_OFFSET: u64 = 100_000_000;

/// Spacing between consecutive test blocks.
pub const BLOCK_SPACING: u64 = 30;

/// Simple puzzle hash from a seed byte.
pub fn pkh(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Key owning the regtest premine.
pub fn test_key() -> KeyPair {
    KeyPair::from_seed(&[0x42; 32])
}

/// Regtest constants with the premine locked to [`test_key`].
pub fn test_constants() -> ConsensusConstants {
    ConsensusConstants {
        genesis_puzzle_hash: test_key().puzzle_hash(),
        ..ConsensusConstants::regtest()
    }
}

/// Engine over [`test_constants`] with a clock fixed far past genesis.
pub fn test_engine() -> ConsensusEngine {
    let constants = test_constants();
    let now = constants.genesis_timestamp + CLOCK_OFFSET;
    ConsensusEngine::with_clock(constants, move || now)
}

pub fn test_config(mempool: MempoolConfig) -> NodeConfig {
    NodeConfig {
        network: NetworkType::Regtest,
        mempool,
        ..NodeConfig::default()
    }
}

pub fn memory_node() -> FullNode {
    memory_node_with_mempool(MempoolConfig::default())
}

pub fn memory_node_with_mempool(mempool: MempoolConfig) -> FullNode {
    FullNode::in_memory(test_engine(), test_config(mempool)).unwrap()
}

/// Node on RocksDB under `dir`. Reopening the same `dir` resumes the chain.
pub fn rocks_node(dir: &Path) -> FullNode {
    let config = NodeConfig { data_dir: dir.to_path_buf(), ..test_config(MempoolConfig::default()) };
    let store: SharedChainDb = Arc::new(RwLock::new(RocksStore::open(config.db_path()).unwrap()));
    FullNode::with_store(store, test_engine(), config).unwrap()
}

/// The premine coin minted by the test genesis.
pub fn premine() -> Coin {
    grove_consensus::genesis_block(&test_constants()).reward_coins[0]
}

/// Sign and bundle spends of `coins` by `key`, each creating `outputs`.
pub fn spend_coins(key: &KeyPair, spends: &[(Coin, Vec<Condition>)]) -> SpendBundle {
    let challenge = test_constants().genesis_challenge;
    let mut coin_spends = Vec::with_capacity(spends.len());
    let mut sigs = Vec::with_capacity(spends.len());
    for (coin, conditions) in spends {
        let solution = standard_solution(conditions).unwrap();
        sigs.push(key.sign_spend(coin, &solution, &challenge));
        coin_spends.push(CoinSpend { coin: *coin, puzzle_reveal: key.public_key_bytes(), solution });
    }
    SpendBundle::new(coin_spends, aggregate_signatures(sigs.iter()))
}

/// Spend `coin` (owned by [`test_key`]) to `to`, leaving `fee`.
pub fn pay(coin: Coin, to: Hash256, fee: u64) -> SpendBundle {
    spend_coins(
        &test_key(),
        &[(coin, vec![Condition::CreateCoin { puzzle_hash: to, amount: coin.amount - fee }])],
    )
}

/// Validate `bundle` against the node's peak.
pub fn bundle_conditions(node: &FullNode, bundle: &SpendBundle) -> BundleConditions {
    let store = node.blockchain().store().read();
    let view = peak_view(&*store).unwrap();
    node.consensus().validate_spend_bundle(bundle, &view).unwrap()
}

/// Mine a block from the node's mempool on top of its peak.
pub fn mine_next(node: &FullNode, farmer: Hash256) -> Block {
    let peak = node.get_peak().unwrap().unwrap();
    node.create_block(farmer, peak.timestamp + BLOCK_SPACING).unwrap()
}

/// Mine `bundles` directly on top of `parent`, bypassing the mempool.
pub fn block_on(
    node: &FullNode,
    parent: &BlockRecord,
    bundles: &[SpendBundle],
    fees: u64,
    farmer: Hash256,
    difficulty: u64,
) -> Block {
    let mut block = node
        .consensus()
        .create_block(parent, bundles, fees, farmer, parent.timestamp + BLOCK_SPACING, difficulty)
        .unwrap();
    assert!(mine_block(&mut block, u64::MAX));
    block
}

/// Split the premine into `n` coins of roughly `amount` (the i-th is
/// `amount + i`) owned by [`test_key`], confirmed in one block.
///
/// Must run on a node still at genesis.
pub fn fund(node: &FullNode, n: usize, amount: u64) -> Vec<Coin> {
    let premine = premine();
    let owner = test_key().puzzle_hash();
    let mut outputs: Vec<Condition> = (0..n as u64)
        .map(|i| Condition::CreateCoin { puzzle_hash: owner, amount: amount + i })
        .collect();
    let spent: u64 = (0..n as u64).map(|i| amount + i).sum();
    outputs.push(Condition::CreateCoin { puzzle_hash: pkh(0xCC), amount: premine.amount - spent });
    let bundle = spend_coins(&test_key(), &[(premine, outputs)]);
    let created = bundle_conditions(node, &bundle).additions;

    let peak = node.get_peak().unwrap().unwrap();
    let block = block_on(node, &peak, &[bundle], 0, pkh(0xFA), 1);
    assert!(matches!(
        node.add_block(&block).unwrap(),
        grove_node_lib::AddBlockResult::Added(_)
    ));
    created.into_iter().filter(|c| c.puzzle_hash == owner).collect()
}
