//! Chain state: block ingestion, fork choice, and reorganization.
//!
//! [`Blockchain`] owns the notion of the peak. Every candidate is validated
//! against the coin set as of its parent, which for a fork means a
//! [`CoinSetView`] rolled back to the fork point with the fork's own blocks
//! replayed on top. Storage is mutated only after the whole candidate
//! chain has validated, through one [`ChainDb::commit`].

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use grove_core::block_store::BlockStore;
use grove_core::chain_state::{AppliedBlock, ChainDb, ChainUpdate, CoinSetView};
use grove_core::coin_store::CoinStore;
use grove_core::error::{BlockError, ChainStateError, GroveError};
use grove_core::traits::{CoinView, ConsensusValidator};
use grove_core::types::{Block, BlockRecord, CoinRecord, Hash256};

/// Shared handle to chain storage.
pub type SharedChainDb = Arc<RwLock<dyn ChainDb>>;

/// Outcome of [`Blockchain::add_block`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddBlockResult {
    /// The block became the new peak, by extension or by reorg.
    Added(PeakChange),
    /// Stored on a branch that does not outweigh the current peak.
    AddedToFork,
    AlreadyHave,
    /// Failed consensus validation. Permanent for this block.
    InvalidBlock(BlockError),
    /// The parent is unknown.
    DisconnectedBlock,
}

/// Notification of a peak move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeakChange {
    pub old_peak: Option<BlockRecord>,
    pub new_peak: BlockRecord,
    /// Height the coin set was rolled back to (`None` for genesis).
    pub fork_height: Option<u64>,
    pub spent_coin_ids: Vec<Hash256>,
    pub created_coin_ids: Vec<Hash256>,
}

impl PeakChange {
    /// Whether blocks of the old canonical chain were abandoned.
    pub fn is_reorg(&self) -> bool {
        match (self.old_peak, self.fork_height) {
            (Some(old), Some(fork)) => fork < old.height,
            _ => false,
        }
    }
}

/// Coin view of the canonical chain at its current peak.
pub fn peak_view(store: &(dyn ChainDb + 'static)) -> Result<CoinSetView<'_, dyn ChainDb>, GroveError> {
    let peak = store.get_peak()?;
    Ok(CoinSetView::new(store, peak.map(|p| p.height)))
}

/// What to do with a candidate that passed validation.
enum Plan {
    Commit(ChainUpdate),
    StoreOnly,
}

/// Block ingestion and fork choice over a [`ChainDb`].
pub struct Blockchain {
    store: SharedChainDb,
    validator: Arc<dyn ConsensusValidator>,
    /// Serializes block acceptance.
    writer: Mutex<()>,
}

impl Blockchain {
    pub fn new(store: SharedChainDb, validator: Arc<dyn ConsensusValidator>) -> Self {
        Self { store, validator, writer: Mutex::new(()) }
    }

    pub fn store(&self) -> &SharedChainDb {
        &self.store
    }

    pub fn validator(&self) -> &Arc<dyn ConsensusValidator> {
        &self.validator
    }

    /// Validate `block` and, if it wins fork choice, make it the peak.
    ///
    /// `Err` is reserved for storage faults; rule violations come back as
    /// [`AddBlockResult::InvalidBlock`].
    pub fn add_block(&self, block: &Block) -> Result<AddBlockResult, GroveError> {
        self.add_block_with(block, |_| Ok(()))
    }

    /// [`add_block`](Self::add_block), running `on_peak` after a peak move
    /// while block acceptance is still held. Peak changes therefore reach
    /// `on_peak` in commit order.
    pub fn add_block_with<F>(&self, block: &Block, on_peak: F) -> Result<AddBlockResult, GroveError>
    where
        F: FnOnce(&PeakChange) -> Result<(), GroveError>,
    {
        let _writer = self.writer.lock();
        let hash = block.hash();

        let (old_peak, plan) = {
            let store = self.store.read();
            if store.contains_block(&hash)? {
                return Ok(AddBlockResult::AlreadyHave);
            }
            let parent = if block.height() == 0 && block.header.prev_hash.is_zero() {
                None
            } else {
                match store.get_block_record(&block.header.prev_hash)? {
                    Some(record) => Some(record),
                    None => {
                        debug!(%hash, prev = %block.header.prev_hash, "disconnected block");
                        return Ok(AddBlockResult::DisconnectedBlock);
                    }
                }
            };
            if let Err(e) = self.validator.validate_header(&block.header, parent.as_ref()) {
                return invalid(&hash, e);
            }
            let peak = store.get_peak()?;
            match self.plan(&*store, block, parent, peak)? {
                Ok(plan) => (peak, plan),
                Err(reason) => {
                    warn!(%hash, height = block.height(), %reason, "rejected block");
                    return Ok(AddBlockResult::InvalidBlock(reason));
                }
            }
        };

        let update = match plan {
            Plan::StoreOnly => {
                self.store.write().add_block(block)?;
                info!(%hash, height = block.height(), weight = %block.header.weight, "stored fork block");
                return Ok(AddBlockResult::AddedToFork);
            }
            Plan::Commit(update) => update,
        };

        let delta = self.store.write().commit(&update)?;
        let new_peak = BlockRecord::from_header(&block.header);
        let change = PeakChange {
            old_peak,
            new_peak,
            fork_height: update.fork_height,
            spent_coin_ids: delta.spent,
            created_coin_ids: delta.created,
        };
        if change.is_reorg() {
            info!(
                %hash,
                height = new_peak.height,
                fork_height = ?update.fork_height,
                depth = update.blocks.len(),
                "reorganized to heavier chain"
            );
        } else {
            info!(%hash, height = new_peak.height, "new peak");
        }
        on_peak(&change)?;
        Ok(AddBlockResult::Added(change))
    }

    /// Decide what accepting `block` means, validating it (and any fork
    /// blocks it builds on) against the coin set as of its parent.
    fn plan(
        &self,
        store: &dyn ChainDb,
        block: &Block,
        parent: Option<BlockRecord>,
        peak: Option<BlockRecord>,
    ) -> Result<Result<Plan, BlockError>, GroveError> {
        // Walk back to the canonical chain, collecting the fork's own blocks.
        let mut branch = Vec::new();
        let mut cursor = parent;
        let mut fork_record = None;
        while let Some(record) = cursor {
            if store.is_canonical(&record)? {
                fork_record = Some(record);
                break;
            }
            branch.push(record);
            cursor = if record.height == 0 {
                None
            } else {
                Some(
                    store
                        .get_block_record(&record.prev_hash)?
                        .ok_or(ChainStateError::BlockNotFound(record.prev_hash))?,
                )
            };
        }
        branch.reverse();
        let fork_height = fork_record.map(|r| r.height);

        // A non-winning block is still checked against its own branch.
        let applied = match self.validate_on_branch(store, block, fork_record, &branch)? {
            Ok(applied) => applied,
            Err(reason) => return Ok(Err(reason)),
        };
        if peak.is_some_and(|p| block.header.weight <= p.weight) {
            return Ok(Ok(Plan::StoreOnly));
        }
        Ok(Ok(Plan::Commit(ChainUpdate { fork_height, blocks: applied })))
    }

    /// Replay `branch` from the fork point and validate `block` on top.
    ///
    /// Returns the branch blocks plus `block` with their computed additions.
    fn validate_on_branch(
        &self,
        store: &dyn ChainDb,
        block: &Block,
        fork_record: Option<BlockRecord>,
        branch: &[BlockRecord],
    ) -> Result<Result<Vec<AppliedBlock>, BlockError>, GroveError> {
        let mut view = CoinSetView::new(store, fork_record.map(|r| r.height));
        let mut applied = Vec::with_capacity(branch.len() + 1);
        let mut parent = fork_record;

        let mut bodies = Vec::with_capacity(branch.len());
        for record in branch {
            let body = store
                .get_block(&record.header_hash)?
                .ok_or(ChainStateError::BlockNotFound(record.header_hash))?;
            bodies.push(body);
        }

        for candidate in bodies.iter().chain(std::iter::once(block)) {
            let validated = match self.validator.validate_block(candidate, parent.as_ref(), &view) {
                Ok(v) => v,
                Err(e) => return e.into_block_error().map(Err),
            };
            if let Err(e) = view.apply(
                candidate.height(),
                candidate.header.timestamp,
                &validated.additions,
                &candidate.reward_coins,
                &validated.removals,
            ) {
                return match e {
                    GroveError::ChainState(ChainStateError::DuplicateCoin(id)) => {
                        Ok(Err(BlockError::DuplicateCoin(id)))
                    }
                    other => Err(other),
                };
            }
            parent = Some(BlockRecord::from_header(&candidate.header));
            applied.push(AppliedBlock { block: candidate.clone(), additions: validated.additions });
        }
        Ok(Ok(applied))
    }

    pub fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        self.store.read().get_peak()
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        self.store.read().get_block(hash)
    }

    pub fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError> {
        self.store.read().get_block_record(hash)
    }

    pub fn get_block_at_height(&self, height: u64) -> Result<Option<Block>, GroveError> {
        self.store.read().get_block_at_height(height)
    }

    pub fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        self.store.read().get_coin_record(coin_id)
    }

    pub fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        self.store.read().get_coin_records_by_puzzle_hash(puzzle_hash, include_spent)
    }
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain").finish_non_exhaustive()
    }
}

fn invalid(hash: &Hash256, e: GroveError) -> Result<AddBlockResult, GroveError> {
    let reason = e.into_block_error()?;
    warn!(%hash, %reason, "rejected block header");
    Ok(AddBlockResult::InvalidBlock(reason))
}
