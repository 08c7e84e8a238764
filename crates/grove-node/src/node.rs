//! Full node composition.
//!
//! [`FullNode`] wires storage, the [`Blockchain`], the [`MempoolManager`]
//! and the consensus engine together. Every peak move is forwarded to the
//! mempool and then published on a broadcast channel as a [`PeakChange`].

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use grove_consensus::{genesis_block, mine_block, ConsensusEngine};
use grove_core::block_store::BlockStore;
use grove_core::chain_state::MemoryChainDb;
use grove_core::error::{BlockError, GroveError, SpendError};
use grove_core::traits::ConsensusValidator;
use grove_core::types::{Block, BlockRecord, CoinRecord, Hash256, SpendBundle};

use crate::blockchain::{AddBlockResult, Blockchain, PeakChange, SharedChainDb};
use crate::config::NodeConfig;
use crate::mempool_manager::{AddBundleResult, MempoolManager};
use crate::storage::RocksStore;

/// Capacity of the peak event channel. Slow subscribers see `Lagged`.
pub const PEAK_CHANNEL_CAPACITY: usize = 256;

/// A full node: chain state, mempool, and block production.
pub struct FullNode {
    blockchain: Blockchain,
    mempool: MempoolManager,
    consensus: Arc<ConsensusEngine>,
    events: broadcast::Sender<PeakChange>,
    config: NodeConfig,
}

impl FullNode {
    /// Open (or create) the node's RocksDB under `config.db_path()`.
    pub fn open(config: NodeConfig) -> Result<Self, GroveError> {
        let store = RocksStore::open(config.db_path())?;
        let consensus = ConsensusEngine::new(config.network.constants());
        info!(network = ?config.network, path = %config.db_path().display(), "opened chain database");
        Self::with_store(Arc::new(RwLock::new(store)), consensus, config)
    }

    /// A node backed by memory only.
    pub fn in_memory(consensus: ConsensusEngine, config: NodeConfig) -> Result<Self, GroveError> {
        Self::with_store(Arc::new(RwLock::new(MemoryChainDb::new())), consensus, config)
    }

    /// Assemble a node over an existing store, adding genesis if the store
    /// is empty and refusing a store that belongs to another network.
    pub fn with_store(
        store: SharedChainDb,
        consensus: ConsensusEngine,
        config: NodeConfig,
    ) -> Result<Self, GroveError> {
        let consensus = Arc::new(consensus);
        let validator: Arc<dyn ConsensusValidator> = consensus.clone();
        let blockchain = Blockchain::new(store.clone(), validator.clone());
        let mempool = MempoolManager::new(store, validator, &config.mempool);
        let (events, _) = broadcast::channel(PEAK_CHANNEL_CAPACITY);
        let node = Self { blockchain, mempool, consensus, events, config };
        node.ensure_genesis()?;
        Ok(node)
    }

    fn ensure_genesis(&self) -> Result<(), GroveError> {
        let expected = self.consensus.genesis_hash();
        let stored = self.blockchain.store().read().get_hash_at_height(0)?;
        match stored {
            Some(hash) if hash == expected => Ok(()),
            Some(hash) => Err(GroveError::Config(format!(
                "database genesis {hash} does not match network genesis {expected}"
            ))),
            None => {
                let genesis = genesis_block(self.consensus.constants());
                match self.blockchain.add_block(&genesis)? {
                    AddBlockResult::Added(_) => {
                        info!(%expected, "initialized chain with genesis");
                        Ok(())
                    }
                    AddBlockResult::InvalidBlock(reason) => Err(reason.into()),
                    other => Err(GroveError::Storage(format!("unexpected genesis result: {other:?}"))),
                }
            }
        }
    }

    /// Submit a block. A peak move updates the mempool and notifies
    /// subscribers before block acceptance is released, so concurrent
    /// submissions are seen by both in commit order.
    pub fn add_block(&self, block: &Block) -> Result<AddBlockResult, GroveError> {
        self.blockchain.add_block_with(block, |change| {
            self.mempool.new_peak(change)?;
            // No subscribers is fine.
            let _ = self.events.send(change.clone());
            Ok(())
        })
    }

    pub fn add_spend_bundle(&self, bundle: SpendBundle) -> Result<AddBundleResult, GroveError> {
        self.mempool.add_spend_bundle(bundle)
    }

    /// Receive every future [`PeakChange`].
    pub fn subscribe(&self) -> broadcast::Receiver<PeakChange> {
        self.events.subscribe()
    }

    /// Build and mine a block on the current peak from the best mempool
    /// items, paying the reward and fees to `farmer_puzzle_hash`.
    ///
    /// The block is returned, not added; pass it to [`add_block`](Self::add_block).
    pub fn create_block(&self, farmer_puzzle_hash: Hash256, timestamp: u64) -> Result<Block, GroveError> {
        let peak = self
            .get_peak()?
            .ok_or_else(|| GroveError::Storage("chain has no peak".into()))?;
        let constants = self.consensus.constants();
        let height = peak.height + 1;
        let timestamp = timestamp.max(peak.timestamp + 1);

        let items = self.mempool.select_for_block(constants.max_block_cost, height, timestamp);
        let fees = items.iter().try_fold(0u64, |acc, item| acc.checked_add(item.fee));
        let fees = fees.ok_or(BlockError::Spend(SpendError::ValueOverflow))?;
        let bundles: Vec<SpendBundle> = items.into_iter().map(|item| item.spend_bundle).collect();

        let mut block = self.consensus.create_block(
            &peak,
            &bundles,
            fees,
            farmer_puzzle_hash,
            timestamp,
            constants.min_difficulty,
        )?;
        if !mine_block(&mut block, u64::MAX) {
            return Err(BlockError::InvalidProof.into());
        }
        debug!(height, bundles = bundles.len(), fees, nonce = block.header.nonce, "created block");
        Ok(block)
    }

    pub fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        self.blockchain.get_peak()
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        self.blockchain.get_block(hash)
    }

    pub fn get_block_at_height(&self, height: u64) -> Result<Option<Block>, GroveError> {
        self.blockchain.get_block_at_height(height)
    }

    pub fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        self.blockchain.get_coin_record(coin_id)
    }

    pub fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        self.blockchain.get_coin_records_by_puzzle_hash(puzzle_hash, include_spent)
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn mempool(&self) -> &MempoolManager {
        &self.mempool
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

impl std::fmt::Debug for FullNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullNode")
            .field("network", &self.config.network)
            .field("mempool", &self.mempool)
            .finish_non_exhaustive()
    }
}
