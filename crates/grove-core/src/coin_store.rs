//! Coin set storage interface and in-memory implementation.
//!
//! A coin record is created once by the block that confirms the coin and
//! updated once by the block that spends it. Rollback undoes both kinds of
//! change above a height using per-height indexes, so its cost follows the
//! depth of the rollback rather than the size of the coin set.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{ChainStateError, GroveError};
use crate::traits::CoinView;
use crate::types::{Coin, CoinRecord, Hash256};

/// Coin ids touched by applying one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinStoreDelta {
    /// Coins created (including reward coins and ephemeral coins).
    pub created: Vec<Hash256>,
    /// Coins marked spent.
    pub spent: Vec<Hash256>,
}

/// Coin ids touched by a rollback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollbackDelta {
    /// Coins confirmed above the target height, now deleted.
    pub removed: Vec<Hash256>,
    /// Coins spent above the target height, now unspent again.
    pub unspent: Vec<Hash256>,
}

/// Mutable coin set storage.
///
/// Implementations must apply each call atomically: a failed call leaves
/// the store exactly as it was.
pub trait CoinStore: CoinView + Send + Sync {
    /// All coins locked to `puzzle_hash`, optionally including spent ones.
    fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError>;

    /// Record the coin changes of a block at `height`.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::MissingCoin`] if a removal is neither stored nor created in this block
    /// - [`ChainStateError::DoubleSpend`] if a removal is already spent or listed twice
    /// - [`ChainStateError::DuplicateCoin`] if an addition already exists
    fn apply_block(
        &mut self,
        height: u64,
        timestamp: u64,
        additions: &[Coin],
        reward_coins: &[Coin],
        removals: &[Hash256],
    ) -> Result<CoinStoreDelta, GroveError>;

    /// Restore the coin set to its state right after the block at `height`.
    fn rollback_to(&mut self, height: u64) -> Result<RollbackDelta, GroveError>;
}

/// Check a block's coin changes against `view` and produce the records to write.
///
/// Runs every check before returning, so callers can write the result
/// without partial-failure handling. A coin created and spent in the same
/// block is recorded as created and spent at `height`.
pub fn block_coin_records<V: CoinView + ?Sized>(
    view: &V,
    height: u64,
    timestamp: u64,
    additions: &[Coin],
    reward_coins: &[Coin],
    removals: &[Hash256],
) -> Result<(Vec<CoinRecord>, CoinStoreDelta), GroveError> {
    let mut fresh: HashMap<Hash256, CoinRecord> = HashMap::new();
    let mut created = Vec::with_capacity(additions.len() + reward_coins.len());

    let new_coins = additions
        .iter()
        .map(|c| (c, false))
        .chain(reward_coins.iter().map(|c| (c, true)));
    for (coin, coinbase) in new_coins {
        let id = coin.coin_id();
        if fresh.contains_key(&id) || view.get_coin_record(&id)?.is_some() {
            return Err(ChainStateError::DuplicateCoin(id).into());
        }
        fresh.insert(
            id,
            CoinRecord { coin: *coin, confirmed_height: height, spent_height: None, coinbase, timestamp },
        );
        created.push(id);
    }

    let mut updated = Vec::with_capacity(removals.len());
    let mut seen = HashSet::with_capacity(removals.len());
    for id in removals {
        if !seen.insert(*id) {
            return Err(ChainStateError::DoubleSpend(*id).into());
        }
        if let Some(record) = fresh.get_mut(id) {
            record.spent_height = Some(height);
            continue;
        }
        let mut record = view
            .get_coin_record(id)?
            .ok_or(ChainStateError::MissingCoin(*id))?;
        if record.is_spent() {
            return Err(ChainStateError::DoubleSpend(*id).into());
        }
        record.spent_height = Some(height);
        updated.push(record);
    }

    let mut records: Vec<CoinRecord> = created.iter().filter_map(|id| fresh.remove(id)).collect();
    records.extend(updated);
    let delta = CoinStoreDelta { created, spent: removals.to_vec() };
    Ok((records, delta))
}

/// In-memory coin store for tests and ephemeral nodes.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoinStore {
    records: HashMap<Hash256, CoinRecord>,
    by_puzzle_hash: HashMap<Hash256, HashSet<Hash256>>,
    confirmed_at: BTreeMap<u64, Vec<Hash256>>,
    spent_at: BTreeMap<u64, Vec<Hash256>>,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, spent or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of all unspent coins.
    pub fn unspent_ids(&self) -> HashSet<Hash256> {
        self.records
            .iter()
            .filter(|(_, r)| !r.is_spent())
            .map(|(id, _)| *id)
            .collect()
    }

    fn write_record(&mut self, record: CoinRecord) {
        let id = record.coin_id();
        if !self.records.contains_key(&id) {
            self.confirmed_at.entry(record.confirmed_height).or_default().push(id);
            self.by_puzzle_hash.entry(record.coin.puzzle_hash).or_default().insert(id);
        }
        if let Some(h) = record.spent_height {
            self.spent_at.entry(h).or_default().push(id);
        }
        self.records.insert(id, record);
    }
}

impl CoinView for MemoryCoinStore {
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        Ok(self.records.get(coin_id).cloned())
    }
}

impl CoinStore for MemoryCoinStore {
    fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        let Some(ids) = self.by_puzzle_hash.get(puzzle_hash) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<CoinRecord> = ids
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| include_spent || !r.is_spent())
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.confirmed_height, r.coin_id()));
        Ok(out)
    }

    fn apply_block(
        &mut self,
        height: u64,
        timestamp: u64,
        additions: &[Coin],
        reward_coins: &[Coin],
        removals: &[Hash256],
    ) -> Result<CoinStoreDelta, GroveError> {
        let (records, delta) =
            block_coin_records(&*self, height, timestamp, additions, reward_coins, removals)?;
        for record in records {
            self.write_record(record);
        }
        Ok(delta)
    }

    fn rollback_to(&mut self, height: u64) -> Result<RollbackDelta, GroveError> {
        let mut delta = RollbackDelta::default();
        let Some(above) = height.checked_add(1) else {
            return Ok(delta);
        };

        let spent_above = self.spent_at.split_off(&above);
        for id in spent_above.into_values().flatten() {
            if let Some(record) = self.records.get_mut(&id) {
                if record.spent_height.is_some_and(|h| h > height) {
                    record.spent_height = None;
                    delta.unspent.push(id);
                }
            }
        }

        let confirmed_above = self.confirmed_at.split_off(&above);
        for id in confirmed_above.into_values().flatten() {
            if let Some(record) = self.records.remove(&id) {
                if let Some(set) = self.by_puzzle_hash.get_mut(&record.coin.puzzle_hash) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_puzzle_hash.remove(&record.coin.puzzle_hash);
                    }
                }
                delta.removed.push(id);
            }
        }
        delta.unspent.retain(|id| self.records.contains_key(id));
        Ok(delta)
    }
}
