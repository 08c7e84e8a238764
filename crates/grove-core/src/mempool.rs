//! In-memory pool of validated, unconfirmed spend bundles.
//!
//! The pool provides:
//! - O(1) lookup by bundle name
//! - O(1) conflict detection via a coin id → bundle names index
//! - O(log n) fee-per-cost ordering for block selection and eviction
//! - Cost-bounded storage with replace-by-fee and lowest-rate eviction
//!
//! Bundles must be validated against the coin set by the caller before
//! insertion. The pool itself only resolves duplicates, conflicts, and
//! capacity. An insert either applies completely (including every
//! replacement and eviction it needs) or leaves the pool untouched.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::MempoolError;
use crate::traits::BundleConditions;
use crate::types::{Coin, Hash256, SpendBundle};

/// Default pool capacity: fifty full blocks worth of cost.
pub const DEFAULT_MAX_TOTAL_COST: u64 = 50 * 11_000_000_000;

/// Fee-per-cost precision multiplier.
///
/// Stored as `fee * FEE_RATE_PRECISION / cost` so that small differences
/// in fee still order distinctly.
pub const FEE_RATE_PRECISION: u128 = 1_000;

/// Fee per unit cost, scaled by [`FEE_RATE_PRECISION`].
///
/// Uses a u128 intermediate so large fees cannot overflow.
pub fn compute_fee_per_cost(fee: u64, cost: u64) -> u64 {
    if cost == 0 {
        return u64::MAX;
    }
    let rate = (fee as u128) * FEE_RATE_PRECISION / (cost as u128);
    rate.min(u64::MAX as u128) as u64
}

/// A bundle stored in the pool with its precomputed validation results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolItem {
    pub spend_bundle: SpendBundle,
    pub name: Hash256,
    pub fee: u64,
    pub cost: u64,
    /// Ids of the coins this bundle consumes.
    pub removals: Vec<Hash256>,
    pub additions: Vec<Coin>,
    /// Earliest block height that may include the bundle.
    pub assert_height: u64,
    /// Earliest block timestamp that may include the bundle.
    pub assert_seconds: u64,
    /// Peak height when the bundle was admitted.
    pub height_added: u64,
    fee_per_cost: u64,
}

impl MempoolItem {
    pub fn new(spend_bundle: SpendBundle, conditions: BundleConditions, height_added: u64) -> Self {
        let name = spend_bundle.name();
        let removals = conditions.removals.iter().map(Coin::coin_id).collect();
        Self {
            spend_bundle,
            name,
            fee: conditions.fee,
            cost: conditions.cost,
            removals,
            additions: conditions.additions,
            assert_height: conditions.assert_height,
            assert_seconds: conditions.assert_seconds,
            height_added,
            fee_per_cost: compute_fee_per_cost(conditions.fee, conditions.cost),
        }
    }

    /// Fee per cost scaled by [`FEE_RATE_PRECISION`].
    pub fn fee_per_cost(&self) -> u64 {
        self.fee_per_cost
    }

    /// Whether a block at `height` with `timestamp` may include this item.
    pub fn is_eligible(&self, height: u64, timestamp: u64) -> bool {
        self.assert_height <= height && self.assert_seconds <= timestamp
    }
}

/// Bundles that left the pool to make room for an insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Conflicting bundles replaced by fee.
    pub replaced: Vec<Hash256>,
    /// Unrelated bundles evicted for capacity.
    pub evicted: Vec<Hash256>,
}

/// Cost-bounded pool of validated spend bundles.
///
/// Not thread-safe. Callers wrap it in a `Mutex`.
#[derive(Debug, Clone)]
pub struct Mempool {
    items: HashMap<Hash256, MempoolItem>,
    /// Coin id → names of pool bundles spending it.
    by_coin: HashMap<Hash256, HashSet<Hash256>>,
    /// Ascending `(fee_per_cost, name)`: lowest first for eviction,
    /// reversed for block selection.
    by_fee_rate: BTreeSet<(u64, Hash256)>,
    max_total_cost: u64,
    total_cost: u64,
}

impl Mempool {
    pub fn new(max_total_cost: u64) -> Self {
        Self {
            items: HashMap::new(),
            by_coin: HashMap::new(),
            by_fee_rate: BTreeSet::new(),
            max_total_cost,
            total_cost: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_TOTAL_COST)
    }

    /// Insert a validated item.
    ///
    /// Conflicting items (sharing any consumed coin) are replaced only if
    /// every one of them has a strictly lower fee-per-cost; otherwise the
    /// first conflicting item with an equal or higher rate is reported.
    /// If the pool then lacks room, lowest-rate items are evicted, each of
    /// which must have a strictly lower rate than the newcomer.
    ///
    /// # Errors
    ///
    /// - [`MempoolError::AlreadyExists`] if an item with the same name is present
    /// - [`MempoolError::Conflict`] if replace-by-fee does not apply
    /// - [`MempoolError::PoolFull`] if room cannot be made
    pub fn insert(&mut self, item: MempoolItem) -> Result<InsertOutcome, MempoolError> {
        if self.items.contains_key(&item.name) {
            return Err(MempoolError::AlreadyExists(item.name));
        }
        if item.cost > self.max_total_cost {
            return Err(MempoolError::PoolFull);
        }

        let mut replaced = self.conflicting_names(&item.removals);
        replaced.sort_by_key(|name| std::cmp::Reverse(self.items[name].fee_per_cost));
        if let Some(existing) = replaced.first() {
            if self.items[existing].fee_per_cost >= item.fee_per_cost {
                return Err(MempoolError::Conflict { existing: *existing });
            }
        }

        let freed: u64 = replaced.iter().map(|name| self.items[name].cost).sum();
        let mut available = self.max_total_cost - self.total_cost + freed;
        let mut evicted = Vec::new();
        for &(rate, name) in &self.by_fee_rate {
            if available >= item.cost {
                break;
            }
            if replaced.contains(&name) {
                continue;
            }
            if rate >= item.fee_per_cost {
                return Err(MempoolError::PoolFull);
            }
            available += self.items[&name].cost;
            evicted.push(name);
        }
        if available < item.cost {
            return Err(MempoolError::PoolFull);
        }

        for name in replaced.iter().chain(&evicted) {
            self.remove_item(name);
        }
        self.add_item(item);
        Ok(InsertOutcome { replaced, evicted })
    }

    fn add_item(&mut self, item: MempoolItem) {
        for coin_id in &item.removals {
            self.by_coin.entry(*coin_id).or_default().insert(item.name);
        }
        self.by_fee_rate.insert((item.fee_per_cost, item.name));
        self.total_cost += item.cost;
        self.items.insert(item.name, item);
    }

    fn remove_item(&mut self, name: &Hash256) -> Option<MempoolItem> {
        let item = self.items.remove(name)?;
        for coin_id in &item.removals {
            if let Some(names) = self.by_coin.get_mut(coin_id) {
                names.remove(name);
                if names.is_empty() {
                    self.by_coin.remove(coin_id);
                }
            }
        }
        self.by_fee_rate.remove(&(item.fee_per_cost, item.name));
        self.total_cost -= item.cost;
        Some(item)
    }

    /// Remove items by name. Unknown names are ignored.
    pub fn remove_from_pool(&mut self, names: &[Hash256]) -> Vec<MempoolItem> {
        names.iter().filter_map(|name| self.remove_item(name)).collect()
    }

    /// Remove every item that consumes any of `coin_ids`.
    pub fn remove_by_coin_ids(&mut self, coin_ids: &[Hash256]) -> Vec<MempoolItem> {
        let names = self.conflicting_names(coin_ids);
        self.remove_from_pool(&names)
    }

    /// Remove and return every item, highest fee-per-cost first.
    pub fn drain(&mut self) -> Vec<MempoolItem> {
        let names: Vec<Hash256> = self.by_fee_rate.iter().rev().map(|(_, n)| *n).collect();
        self.remove_from_pool(&names)
    }

    /// Names of items consuming any of `coin_ids`, deduplicated.
    pub fn conflicting_names(&self, coin_ids: &[Hash256]) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        coin_ids
            .iter()
            .filter_map(|id| self.by_coin.get(id))
            .flatten()
            .filter(|name| seen.insert(**name))
            .copied()
            .collect()
    }

    pub fn get(&self, name: &Hash256) -> Option<&MempoolItem> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &Hash256) -> bool {
        self.items.contains_key(name)
    }

    /// All items, highest fee-per-cost first.
    pub fn items(&self) -> impl Iterator<Item = &MempoolItem> {
        self.by_fee_rate.iter().rev().filter_map(|(_, name)| self.items.get(name))
    }

    /// Select items for a block at `height` and `timestamp`.
    ///
    /// Greedy by descending fee-per-cost, first-fit on remaining cost.
    /// Items not yet eligible, too costly for the remaining space, or
    /// sharing a coin with an already selected item are skipped.
    pub fn select_for_block(&self, max_cost: u64, height: u64, timestamp: u64) -> Vec<&MempoolItem> {
        let mut selected = Vec::new();
        let mut remaining = max_cost;
        let mut used_coins: HashSet<Hash256> = HashSet::new();

        for item in self.items() {
            if remaining == 0 {
                break;
            }
            if item.cost > remaining || !item.is_eligible(height, timestamp) {
                continue;
            }
            if item.removals.iter().any(|id| used_coins.contains(id)) {
                continue;
            }
            used_coins.extend(item.removals.iter().copied());
            remaining -= item.cost;
            selected.push(item);
        }
        selected
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn max_total_cost(&self) -> u64 {
        self.max_total_cost
    }

    pub fn total_fees(&self) -> u64 {
        self.items.values().map(|i| i.fee).sum()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
