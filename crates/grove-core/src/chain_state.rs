//! Combined chain storage and the fork-aware coin view.
//!
//! [`ChainDb`] ties a [`CoinStore`] and a [`BlockStore`] together behind a
//! single [`commit`](ChainDb::commit), so a block extension or a whole reorg
//! (rollback plus replay plus peak move) lands as one unit. The
//! [`MemoryChainDb`] is for tests and ephemeral nodes; the production node
//! uses RocksDB (grove-node).
//!
//! [`CoinSetView`] answers coin queries as of a fork point plus the changes
//! of the fork's own blocks, letting the validator check a competing chain
//! without mutating storage.

use std::collections::HashMap;

use crate::block_store::{BlockStore, MemoryBlockStore};
use crate::coin_store::{block_coin_records, CoinStore, CoinStoreDelta, MemoryCoinStore, RollbackDelta};
use crate::error::{ChainStateError, GroveError};
use crate::traits::CoinView;
use crate::types::{Block, BlockRecord, Coin, CoinRecord, Hash256};

/// A validated block together with the coins its spends create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedBlock {
    pub block: Block,
    /// Coins created by the block's spends (reward coins excluded).
    pub additions: Vec<Coin>,
}

/// Everything needed to move the peak.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainUpdate {
    /// Height the coin set is rolled back to first; `None` only for genesis.
    pub fork_height: Option<u64>,
    /// Blocks to apply on top of the fork point, in height order.
    pub blocks: Vec<AppliedBlock>,
}

/// Coin ids touched by a committed [`ChainUpdate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainDelta {
    pub rollback: RollbackDelta,
    pub spent: Vec<Hash256>,
    pub created: Vec<Hash256>,
}

/// Chain storage that can commit a [`ChainUpdate`] atomically.
pub trait ChainDb: CoinStore + BlockStore {
    /// Apply `update`. On error nothing is changed.
    fn commit(&mut self, update: &ChainUpdate) -> Result<ChainDelta, GroveError>;
}

/// Check that `fork_height` is a valid fork point under `peak`, returning
/// the height to roll back to if the update abandons blocks.
fn rollback_target(fork_height: Option<u64>, peak: Option<BlockRecord>) -> Result<Option<u64>, GroveError> {
    match (fork_height, peak) {
        (None, Some(_)) => Err(ChainStateError::GenesisExists.into()),
        (Some(fork), None) => Err(ChainStateError::NoBlockAtHeight(fork).into()),
        (Some(fork), Some(peak)) if fork > peak.height => {
            Err(ChainStateError::RollbackAbovePeak { target: fork, peak: peak.height }.into())
        }
        (Some(fork), Some(peak)) if fork < peak.height => Ok(Some(fork)),
        _ => Ok(None),
    }
}

/// Run `update` against `db` step by step.
///
/// Not atomic by itself; [`ChainDb`] implementations wrap it in whatever
/// gives them all-or-nothing semantics.
pub fn apply_update<D: CoinStore + BlockStore + ?Sized>(
    db: &mut D,
    update: &ChainUpdate,
) -> Result<ChainDelta, GroveError> {
    let mut delta = ChainDelta::default();
    if let Some(fork) = rollback_target(update.fork_height, db.get_peak()?)? {
        delta.rollback = db.rollback_to(fork)?;
    }

    let mut expected = update.fork_height.map_or(0, |h| h + 1);
    let mut hashes = Vec::with_capacity(update.blocks.len());
    for applied in &update.blocks {
        let header = &applied.block.header;
        if header.height != expected {
            return Err(ChainStateError::HeightMismatch { expected, got: header.height }.into());
        }
        let record = db.add_block(&applied.block)?;
        let removals = applied.block.removal_ids();
        let coins = db.apply_block(
            header.height,
            header.timestamp,
            &applied.additions,
            &applied.block.reward_coins,
            &removals,
        )?;
        delta.spent.extend(coins.spent);
        delta.created.extend(coins.created);
        hashes.push(record.header_hash);
        expected += 1;
    }
    db.set_peak(update.fork_height, &hashes)?;
    Ok(delta)
}

/// In-memory [`ChainDb`].
///
/// A commit is first checked against a [`CoinSetView`] at the fork point,
/// which costs the size of the update, and only then written.
#[derive(Clone, Debug, Default)]
pub struct MemoryChainDb {
    coins: MemoryCoinStore,
    blocks: MemoryBlockStore,
}

impl MemoryChainDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coin_store(&self) -> &MemoryCoinStore {
        &self.coins
    }

    /// Every check [`apply_update`] makes, run without writing.
    fn check_update(&self, update: &ChainUpdate) -> Result<(), GroveError> {
        rollback_target(update.fork_height, self.get_peak()?)?;
        let mut expected_height = update.fork_height.map_or(0, |h| h + 1);
        let mut expected_prev = match update.fork_height {
            Some(h) => self
                .get_hash_at_height(h)?
                .ok_or(ChainStateError::NoBlockAtHeight(h))?,
            None => Hash256::ZERO,
        };
        let mut view = CoinSetView::new(self, update.fork_height);
        for applied in &update.blocks {
            let header = &applied.block.header;
            if header.height != expected_height {
                return Err(ChainStateError::HeightMismatch { expected: expected_height, got: header.height }.into());
            }
            if header.prev_hash != expected_prev {
                return Err(ChainStateError::BlockNotFound(header.prev_hash).into());
            }
            view.apply(
                header.height,
                header.timestamp,
                &applied.additions,
                &applied.block.reward_coins,
                &applied.block.removal_ids(),
            )?;
            expected_height += 1;
            expected_prev = applied.block.hash();
        }
        Ok(())
    }
}

impl CoinView for MemoryChainDb {
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        self.coins.get_coin_record(coin_id)
    }
}

impl CoinStore for MemoryChainDb {
    fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        self.coins.get_coin_records_by_puzzle_hash(puzzle_hash, include_spent)
    }

    fn apply_block(
        &mut self,
        height: u64,
        timestamp: u64,
        additions: &[Coin],
        reward_coins: &[Coin],
        removals: &[Hash256],
    ) -> Result<CoinStoreDelta, GroveError> {
        self.coins.apply_block(height, timestamp, additions, reward_coins, removals)
    }

    fn rollback_to(&mut self, height: u64) -> Result<RollbackDelta, GroveError> {
        self.coins.rollback_to(height)
    }
}

impl BlockStore for MemoryChainDb {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        self.blocks.get_block(hash)
    }

    fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError> {
        self.blocks.get_block_record(hash)
    }

    fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, GroveError> {
        self.blocks.get_hash_at_height(height)
    }

    fn add_block(&mut self, block: &Block) -> Result<BlockRecord, GroveError> {
        self.blocks.add_block(block)
    }

    fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        self.blocks.get_peak()
    }

    fn set_peak(&mut self, fork_height: Option<u64>, new_chain: &[Hash256]) -> Result<(), GroveError> {
        self.blocks.set_peak(fork_height, new_chain)
    }
}

impl ChainDb for MemoryChainDb {
    fn commit(&mut self, update: &ChainUpdate) -> Result<ChainDelta, GroveError> {
        self.check_update(update)?;
        apply_update(self, update)
    }
}

/// Coin set as of `fork_height`, plus the changes of blocks applied on top.
///
/// Base records confirmed above the fork are hidden and spends above the
/// fork are reported as unspent. `fork_height = None` hides the whole base.
pub struct CoinSetView<'a, C: CoinView + ?Sized> {
    base: &'a C,
    fork_height: Option<u64>,
    overlay: HashMap<Hash256, CoinRecord>,
}

impl<'a, C: CoinView + ?Sized> CoinSetView<'a, C> {
    pub fn new(base: &'a C, fork_height: Option<u64>) -> Self {
        Self { base, fork_height, overlay: HashMap::new() }
    }

    /// Layer one block's coin changes onto the view.
    pub fn apply(
        &mut self,
        height: u64,
        timestamp: u64,
        additions: &[Coin],
        reward_coins: &[Coin],
        removals: &[Hash256],
    ) -> Result<(), GroveError> {
        let (records, _) = block_coin_records(&*self, height, timestamp, additions, reward_coins, removals)?;
        for record in records {
            self.overlay.insert(record.coin_id(), record);
        }
        Ok(())
    }
}

impl<C: CoinView + ?Sized> CoinView for CoinSetView<'_, C> {
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        if let Some(record) = self.overlay.get(coin_id) {
            return Ok(Some(record.clone()));
        }
        let Some(fork) = self.fork_height else {
            return Ok(None);
        };
        Ok(self.base.get_coin_record(coin_id)?.and_then(|mut record| {
            if record.confirmed_height > fork {
                return None;
            }
            if record.spent_height.is_some_and(|h| h > fork) {
                record.spent_height = None;
            }
            Some(record)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockHeader;

    fn block(height: u64, prev: Hash256, reward: Coin, spends: Vec<Coin>) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                height,
                prev_hash: prev,
                weight: height as u128 + 1,
                difficulty: 1,
                timestamp: 1_000 + height,
                transactions_root: Hash256::ZERO,
                nonce: 0,
            },
            reward_coins: vec![reward],
            coin_spends: spends
                .into_iter()
                .map(|coin| crate::types::CoinSpend { coin, puzzle_reveal: vec![], solution: vec![] })
                .collect(),
            aggregated_signature: vec![],
        }
    }

    fn reward(n: u8) -> Coin {
        Coin::new(Hash256([n; 32]), Hash256([0xAA; 32]), 100)
    }

    fn genesis_db() -> (MemoryChainDb, Block) {
        let mut db = MemoryChainDb::new();
        let genesis = block(0, Hash256::ZERO, reward(0), vec![]);
        db.commit(&ChainUpdate {
            fork_height: None,
            blocks: vec![AppliedBlock { block: genesis.clone(), additions: vec![] }],
        })
        .unwrap();
        (db, genesis)
    }

    #[test]
    fn commit_extends_peak_and_coin_set() {
        let (mut db, genesis) = genesis_db();
        let b1 = block(1, genesis.hash(), reward(1), vec![reward(0)]);
        let child = Coin::new(reward(0).coin_id(), Hash256([0xBB; 32]), 100);
        let delta = db
            .commit(&ChainUpdate {
                fork_height: Some(0),
                blocks: vec![AppliedBlock { block: b1.clone(), additions: vec![child] }],
            })
            .unwrap();
        assert_eq!(delta.spent, vec![reward(0).coin_id()]);
        assert_eq!(delta.created, vec![child.coin_id(), reward(1).coin_id()]);
        assert_eq!(db.get_peak().unwrap().unwrap().header_hash, b1.hash());
    }

    #[test]
    fn failed_commit_leaves_store_untouched() {
        let (mut db, genesis) = genesis_db();
        let b1 = block(1, genesis.hash(), reward(1), vec![reward(0)]);
        let bad = block(2, b1.hash(), reward(2), vec![reward(0)]);
        let err = db
            .commit(&ChainUpdate {
                fork_height: Some(0),
                blocks: vec![
                    AppliedBlock { block: b1.clone(), additions: vec![] },
                    AppliedBlock { block: bad, additions: vec![] },
                ],
            })
            .unwrap_err();
        assert!(matches!(err, GroveError::ChainState(ChainStateError::DoubleSpend(_))));
        assert_eq!(db.get_peak().unwrap().unwrap().height, 0);
        assert!(!db.contains_block(&b1.hash()).unwrap());
        assert!(!db.get_coin_record(&reward(0).coin_id()).unwrap().unwrap().is_spent());
    }

    #[test]
    fn reorg_commit_rolls_back_then_replays() {
        let (mut db, genesis) = genesis_db();
        let a1 = block(1, genesis.hash(), reward(1), vec![reward(0)]);
        db.commit(&ChainUpdate {
            fork_height: Some(0),
            blocks: vec![AppliedBlock { block: a1, additions: vec![] }],
        })
        .unwrap();

        let b1 = block(1, genesis.hash(), reward(11), vec![]);
        let b2 = block(2, b1.hash(), reward(12), vec![]);
        let delta = db
            .commit(&ChainUpdate {
                fork_height: Some(0),
                blocks: vec![
                    AppliedBlock { block: b1, additions: vec![] },
                    AppliedBlock { block: b2.clone(), additions: vec![] },
                ],
            })
            .unwrap();
        assert_eq!(delta.rollback.removed, vec![reward(1).coin_id()]);
        assert_eq!(delta.rollback.unspent, vec![reward(0).coin_id()]);
        assert_eq!(db.get_peak().unwrap().unwrap().header_hash, b2.hash());
        assert!(db.get_coin_record(&reward(1).coin_id()).unwrap().is_none());
        assert!(!db.get_coin_record(&reward(0).coin_id()).unwrap().unwrap().is_spent());
    }

    #[test]
    fn failed_reorg_keeps_abandoned_branch() {
        let (mut db, genesis) = genesis_db();
        let a1 = block(1, genesis.hash(), reward(1), vec![reward(0)]);
        db.commit(&ChainUpdate {
            fork_height: Some(0),
            blocks: vec![AppliedBlock { block: a1.clone(), additions: vec![] }],
        })
        .unwrap();

        // B2 spends the premine twice across the branch.
        let b1 = block(1, genesis.hash(), reward(11), vec![reward(0)]);
        let b2 = block(2, b1.hash(), reward(12), vec![reward(0)]);
        let err = db
            .commit(&ChainUpdate {
                fork_height: Some(0),
                blocks: vec![
                    AppliedBlock { block: b1.clone(), additions: vec![] },
                    AppliedBlock { block: b2, additions: vec![] },
                ],
            })
            .unwrap_err();
        assert!(matches!(err, GroveError::ChainState(ChainStateError::DoubleSpend(_))));
        assert_eq!(db.get_peak().unwrap().unwrap().header_hash, a1.hash());
        assert!(db.get_coin_record(&reward(1).coin_id()).unwrap().is_some());
        assert_eq!(db.get_coin_record(&reward(0).coin_id()).unwrap().unwrap().spent_height, Some(1));
        assert!(!db.contains_block(&b1.hash()).unwrap());
    }

    #[test]
    fn unlinked_update_rejected_before_writing() {
        let (mut db, genesis) = genesis_db();
        let b1 = block(1, genesis.hash(), reward(1), vec![]);
        let stray = block(2, Hash256([0xEE; 32]), reward(2), vec![]);
        let err = db
            .commit(&ChainUpdate {
                fork_height: Some(0),
                blocks: vec![
                    AppliedBlock { block: b1.clone(), additions: vec![] },
                    AppliedBlock { block: stray, additions: vec![] },
                ],
            })
            .unwrap_err();
        assert!(matches!(err, GroveError::ChainState(ChainStateError::BlockNotFound(_))));
        assert!(!db.contains_block(&b1.hash()).unwrap());
        assert!(db.get_coin_record(&reward(1).coin_id()).unwrap().is_none());
    }

    #[test]
    fn second_genesis_rejected() {
        let (mut db, _) = genesis_db();
        let other = block(0, Hash256::ZERO, reward(9), vec![]);
        let err = db
            .commit(&ChainUpdate {
                fork_height: None,
                blocks: vec![AppliedBlock { block: other, additions: vec![] }],
            })
            .unwrap_err();
        assert!(matches!(err, GroveError::ChainState(ChainStateError::GenesisExists)));
    }

    #[test]
    fn view_hides_changes_above_fork() {
        let (mut db, genesis) = genesis_db();
        let a1 = block(1, genesis.hash(), reward(1), vec![reward(0)]);
        db.commit(&ChainUpdate {
            fork_height: Some(0),
            blocks: vec![AppliedBlock { block: a1, additions: vec![] }],
        })
        .unwrap();

        let view = CoinSetView::new(&db, Some(0));
        assert!(view.get_coin_record(&reward(1).coin_id()).unwrap().is_none());
        let restored = view.get_coin_record(&reward(0).coin_id()).unwrap().unwrap();
        assert!(!restored.is_spent());

        let tip_view = CoinSetView::new(&db, Some(1));
        assert!(tip_view.get_coin_record(&reward(0).coin_id()).unwrap().unwrap().is_spent());
    }

    #[test]
    fn view_overlay_tracks_fork_blocks() {
        let (db, _) = genesis_db();
        let mut view = CoinSetView::new(&db, Some(0));
        view.apply(1, 1_001, &[], &[reward(5)], &[reward(0).coin_id()]).unwrap();
        assert!(view.get_coin_record(&reward(0).coin_id()).unwrap().unwrap().is_spent());
        assert!(view.get_coin_record(&reward(5).coin_id()).unwrap().is_some());
        assert!(db.get_coin_record(&reward(5).coin_id()).unwrap().is_none());

        let err = view.apply(2, 1_002, &[], &[], &[reward(0).coin_id()]).unwrap_err();
        assert!(matches!(err, GroveError::ChainState(ChainStateError::DoubleSpend(_))));
    }
}
