//! Consensus engine implementing [`ConsensusValidator`].
//!
//! Proof of work is a SHA-256 double hash of the header: the first eight
//! bytes, read little-endian, must not exceed `u64::MAX / difficulty`.
//! Each block adds its difficulty to the cumulative chain weight.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use grove_core::constants::ConsensusConstants;
use grove_core::crypto::{aggregate_signature_bytes, verify_aggregate};
use grove_core::error::{BlockError, GroveError, SpendError};
use grove_core::traits::{
    BundleConditions, CoinView, ConsensusValidator, PuzzleRunner, ValidatedBlock,
};
use grove_core::types::{Block, BlockHeader, BlockRecord, Coin, Hash256, SpendBundle};
use tracing::debug;

use crate::genesis;
use crate::spend::{run_spend_bundle, run_spends, StandardPuzzleRunner};

/// Header version written by this node.
pub const BLOCK_VERSION: u64 = 1;

/// Validates headers, blocks, and pending bundles for one network.
pub struct ConsensusEngine {
    constants: ConsensusConstants,
    runner: Arc<dyn PuzzleRunner>,
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
    genesis_hash: Hash256,
}

impl fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("network", &self.constants.network)
            .field("genesis_hash", &self.genesis_hash)
            .finish_non_exhaustive()
    }
}

impl ConsensusEngine {
    /// Create an engine with the system clock and the standard puzzle runner.
    pub fn new(constants: ConsensusConstants) -> Self {
        Self::with_clock(constants, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    /// Create an engine with a custom clock returning Unix seconds.
    pub fn with_clock(
        constants: ConsensusConstants,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        let genesis_hash = genesis::genesis_hash(&constants);
        Self {
            runner: Arc::new(StandardPuzzleRunner::new(&constants)),
            constants,
            clock: Box::new(clock),
            genesis_hash,
        }
    }

    /// Replace the puzzle runner.
    pub fn with_runner(mut self, runner: Arc<dyn PuzzleRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_hash
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Assemble an unmined block on top of `parent`.
    ///
    /// The reward coin pays `block_reward + fees` to `farmer_puzzle_hash`.
    /// `timestamp` is raised to one second past the parent and `difficulty`
    /// to the network minimum. The nonce is left at zero; see [`mine_block`].
    pub fn create_block(
        &self,
        parent: &BlockRecord,
        bundles: &[SpendBundle],
        fees: u64,
        farmer_puzzle_hash: Hash256,
        timestamp: u64,
        difficulty: u64,
    ) -> Result<Block, BlockError> {
        let height = parent.height + 1;
        let difficulty = difficulty.max(self.constants.min_difficulty);
        let allowed = self
            .constants
            .block_reward
            .checked_add(fees)
            .ok_or(SpendError::ValueOverflow)?;

        let aggregated_signature = aggregate_signature_bytes(
            bundles.iter().map(|b| b.aggregated_signature.as_slice()),
        )
        .ok_or(SpendError::BadAggregateSignature)?;

        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                prev_hash: parent.header_hash,
                weight: parent.weight + u128::from(difficulty),
                difficulty,
                timestamp: timestamp.max(parent.timestamp + 1),
                transactions_root: Hash256::ZERO,
                nonce: 0,
            },
            reward_coins: vec![Coin::new(
                reward_parent(&self.constants.genesis_challenge, height),
                farmer_puzzle_hash,
                allowed,
            )],
            coin_spends: bundles.iter().flat_map(|b| b.coin_spends.iter().cloned()).collect(),
            aggregated_signature,
        };
        block.header.transactions_root = block.compute_transactions_root();
        Ok(block)
    }

    fn validate_genesis_header(&self, header: &BlockHeader) -> Result<(), BlockError> {
        if header.height != 0 {
            return Err(BlockError::InvalidHeight { expected: 0, got: header.height });
        }
        let hash = header.hash();
        if hash != self.genesis_hash {
            return Err(BlockError::WrongGenesis(hash));
        }
        Ok(())
    }

    fn validate_child_header(&self, header: &BlockHeader, parent: &BlockRecord) -> Result<(), BlockError> {
        if header.difficulty < self.constants.min_difficulty {
            return Err(BlockError::DifficultyTooLow {
                got: header.difficulty,
                min: self.constants.min_difficulty,
            });
        }
        if header.prev_hash != parent.header_hash {
            return Err(BlockError::InvalidPrevHash);
        }
        if header.height != parent.height + 1 {
            return Err(BlockError::InvalidHeight { expected: parent.height + 1, got: header.height });
        }
        if header.timestamp <= parent.timestamp {
            return Err(BlockError::TimestampNotAfterParent);
        }
        let expected = parent.weight.saturating_add(u128::from(header.difficulty));
        if header.weight != expected {
            return Err(BlockError::InvalidWeight { expected, got: header.weight });
        }
        Ok(())
    }

    fn check_rewards(&self, block: &Block, allowed: u64) -> Result<(), BlockError> {
        let parent_id = reward_parent(&self.constants.genesis_challenge, block.height());
        let mut total = 0u64;
        for coin in &block.reward_coins {
            if coin.parent_coin_id != parent_id {
                return Err(BlockError::InvalidRewardParent(coin.coin_id()));
            }
            total = total.checked_add(coin.amount).ok_or(SpendError::ValueOverflow)?;
        }
        if total > allowed {
            return Err(BlockError::InvalidReward { got: total, allowed });
        }
        Ok(())
    }

    fn check_new_coins(
        &self,
        additions: &[Coin],
        rewards: &[Coin],
        coins: &dyn CoinView,
    ) -> Result<(), GroveError> {
        let mut fresh = HashSet::with_capacity(additions.len() + rewards.len());
        for coin in additions.iter().chain(rewards) {
            let id = coin.coin_id();
            if !fresh.insert(id) || coins.get_coin_record(&id)?.is_some() {
                return Err(BlockError::DuplicateCoin(id).into());
            }
        }
        Ok(())
    }
}

impl ConsensusValidator for ConsensusEngine {
    fn constants(&self) -> &ConsensusConstants {
        &self.constants
    }

    fn validate_header(&self, header: &BlockHeader, parent: Option<&BlockRecord>) -> Result<(), GroveError> {
        if !check_proof(header) {
            return Err(BlockError::InvalidProof.into());
        }
        let now = self.now();
        if header.timestamp > now.saturating_add(self.constants.max_future_time) {
            return Err(BlockError::TimestampTooFar(header.timestamp).into());
        }
        match parent {
            None => self.validate_genesis_header(header)?,
            Some(parent) => self.validate_child_header(header, parent)?,
        }
        Ok(())
    }

    fn validate_block(
        &self,
        block: &Block,
        parent: Option<&BlockRecord>,
        coins: &dyn CoinView,
    ) -> Result<ValidatedBlock, GroveError> {
        self.validate_header(&block.header, parent)?;
        if block.compute_transactions_root() != block.header.transactions_root {
            return Err(BlockError::InvalidTransactionsRoot.into());
        }

        if parent.is_none() {
            if !block.coin_spends.is_empty() {
                return Err(BlockError::GenesisWithSpends.into());
            }
            self.check_rewards(block, self.constants.genesis_premine)?;
            self.check_new_coins(&[], &block.reward_coins, coins)?;
            return Ok(ValidatedBlock { additions: vec![], removals: vec![], cost: 0, fees: 0 });
        }

        let conditions = if block.coin_spends.is_empty() {
            if !verify_aggregate(&block.aggregated_signature, &[]) {
                return Err(SpendError::BadAggregateSignature.into());
            }
            BundleConditions {
                removals: vec![],
                additions: vec![],
                fee: 0,
                cost: 0,
                assert_height: 0,
                assert_seconds: 0,
            }
        } else {
            let max = self.constants.max_block_cost;
            run_spends(
                self.runner.as_ref(),
                &block.coin_spends,
                &block.aggregated_signature,
                coins,
                max,
            )
            .map_err(|e| match e {
                GroveError::Spend(SpendError::CostExceeded { cost, max }) => {
                    BlockError::CostExceeded { cost, max }.into()
                }
                other => other,
            })?
        };

        if conditions.assert_height > block.height() {
            return Err(SpendError::AssertHeightFailed {
                required: conditions.assert_height,
                height: block.height(),
            }
            .into());
        }
        if conditions.assert_seconds > block.header.timestamp {
            return Err(SpendError::AssertSecondsFailed {
                required: conditions.assert_seconds,
                timestamp: block.header.timestamp,
            }
            .into());
        }

        let allowed = self
            .constants
            .block_reward
            .checked_add(conditions.fee)
            .ok_or(SpendError::ValueOverflow)?;
        self.check_rewards(block, allowed)?;
        self.check_new_coins(&conditions.additions, &block.reward_coins, coins)?;

        debug!(
            height = block.height(),
            spends = block.coin_spends.len(),
            cost = conditions.cost,
            fees = conditions.fee,
            "block passed validation"
        );
        Ok(ValidatedBlock {
            additions: conditions.additions,
            removals: block.removal_ids(),
            cost: conditions.cost,
            fees: conditions.fee,
        })
    }

    fn validate_spend_bundle(
        &self,
        bundle: &SpendBundle,
        coins: &dyn CoinView,
    ) -> Result<BundleConditions, GroveError> {
        run_spend_bundle(self.runner.as_ref(), bundle, coins, self.constants.max_bundle_cost)
    }
}

/// Whether `header` satisfies its own difficulty. Difficulty zero never does.
pub fn check_proof(header: &BlockHeader) -> bool {
    if header.difficulty == 0 {
        return false;
    }
    let hash = header.hash();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix) <= u64::MAX / header.difficulty
}

/// Parent id shared by every reward coin minted at `height`.
pub fn reward_parent(genesis_challenge: &Hash256, height: u64) -> Hash256 {
    let mut data = [0u8; 40];
    data[..32].copy_from_slice(genesis_challenge.as_bytes());
    data[32..].copy_from_slice(&height.to_be_bytes());
    Hash256::sha256(data)
}

/// Attempt to mine a block by iterating nonces.
///
/// Modifies `block.header.nonce` in place. Returns `true` if a valid nonce
/// was found within `[0, max_nonce]`, `false` otherwise.
pub fn mine_block(block: &mut Block, max_nonce: u64) -> bool {
    for nonce in 0..=max_nonce {
        block.header.nonce = nonce;
        if check_proof(&block.header) {
            return true;
        }
    }
    false
}
