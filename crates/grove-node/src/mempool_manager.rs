//! Mempool admission and peak tracking.
//!
//! [`MempoolManager`] sits between callers and the raw [`Mempool`]: it
//! short-circuits resubmissions through the [`SeenSet`], validates bundles
//! against the canonical coin set, and keeps the pool consistent when the
//! peak moves. All admission goes through one mutex, taken after the store
//! read lock, so two bundles spending the same coin can never both land.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use grove_core::block_store::BlockStore;
use grove_core::error::{GroveError, MempoolError, SpendError};
use grove_core::mempool::{Mempool, MempoolItem};
use grove_core::seen::SeenSet;
use grove_core::traits::ConsensusValidator;
use grove_core::types::{Hash256, SpendBundle};

use crate::blockchain::{peak_view, PeakChange, SharedChainDb};
use crate::config::MempoolConfig;

/// Outcome of [`MempoolManager::add_spend_bundle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddBundleResult {
    Accepted { name: Hash256, cost: u64, fee: u64 },
    Rejected(RejectReason),
    /// A pool bundle spending one of the same coins pays an equal or
    /// higher fee per cost.
    Conflict { existing: Hash256 },
}

impl AddBundleResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Seen recently or already pooled.
    Duplicate,
    Invalid(SpendError),
    PoolFull,
}

struct PoolState {
    mempool: Mempool,
    seen: SeenSet,
}

/// Validated, unconfirmed spend bundles for the current peak.
pub struct MempoolManager {
    store: SharedChainDb,
    validator: Arc<dyn ConsensusValidator>,
    pool: Mutex<PoolState>,
}

impl MempoolManager {
    pub fn new(store: SharedChainDb, validator: Arc<dyn ConsensusValidator>, config: &MempoolConfig) -> Self {
        let seen = SeenSet::new(config.seen_capacity, config.seen_ttl_secs);
        Self::with_seen_set(store, validator, config.max_total_cost, seen)
    }

    /// Build with a caller-supplied [`SeenSet`], e.g. one with a fake clock.
    pub fn with_seen_set(
        store: SharedChainDb,
        validator: Arc<dyn ConsensusValidator>,
        max_total_cost: u64,
        seen: SeenSet,
    ) -> Self {
        Self {
            store,
            validator,
            pool: Mutex::new(PoolState { mempool: Mempool::new(max_total_cost), seen }),
        }
    }

    /// Validate `bundle` against the peak and admit it to the pool.
    ///
    /// The name is remembered only when the bundle is accepted, so a
    /// rejected or conflicting bundle can be resubmitted unchanged once
    /// circumstances differ.
    pub fn add_spend_bundle(&self, bundle: SpendBundle) -> Result<AddBundleResult, GroveError> {
        let name = bundle.name();
        let store = self.store.read();
        let mut pool = self.pool.lock();

        if pool.seen.contains(&name) || pool.mempool.contains(&name) {
            debug!(%name, "duplicate spend bundle");
            return Ok(AddBundleResult::Rejected(RejectReason::Duplicate));
        }

        let peak_height = store.get_peak()?.map_or(0, |p| p.height);
        let view = peak_view(&*store)?;
        let conditions = match self.validator.validate_spend_bundle(&bundle, &view) {
            Ok(c) => c,
            Err(e) => {
                let reason = e.into_spend_error()?;
                debug!(%name, %reason, "invalid spend bundle");
                return Ok(AddBundleResult::Rejected(RejectReason::Invalid(reason)));
            }
        };

        let item = MempoolItem::new(bundle, conditions, peak_height);
        let (cost, fee) = (item.cost, item.fee);
        match pool.mempool.insert(item) {
            Ok(outcome) => {
                pool.seen.insert(name);
                debug!(
                    %name,
                    cost,
                    fee,
                    replaced = outcome.replaced.len(),
                    evicted = outcome.evicted.len(),
                    "accepted spend bundle"
                );
                Ok(AddBundleResult::Accepted { name, cost, fee })
            }
            Err(MempoolError::AlreadyExists(_)) => Ok(AddBundleResult::Rejected(RejectReason::Duplicate)),
            Err(MempoolError::Conflict { existing }) => {
                debug!(%name, %existing, "spend bundle conflicts with pool");
                Ok(AddBundleResult::Conflict { existing })
            }
            Err(MempoolError::PoolFull) => {
                debug!(%name, "mempool full");
                Ok(AddBundleResult::Rejected(RejectReason::PoolFull))
            }
        }
    }

    /// Bring the pool in line with a moved peak.
    ///
    /// On a plain extension only bundles spending now-confirmed coins are
    /// dropped. After a reorg every remaining bundle is re-validated
    /// against the new coin set. So is an event whose peak is no longer the
    /// stored peak, since its coin ids may describe an abandoned chain.
    pub fn new_peak(&self, change: &PeakChange) -> Result<(), GroveError> {
        let store = self.store.read();
        let mut pool = self.pool.lock();

        let current = store.get_peak()?;
        let stale = current.map(|p| p.header_hash) != Some(change.new_peak.header_hash);
        if !change.is_reorg() && !stale {
            let removed = pool.mempool.remove_by_coin_ids(&change.spent_coin_ids);
            if !removed.is_empty() {
                debug!(height = change.new_peak.height, removed = removed.len(), "removed confirmed bundles");
            }
            return Ok(());
        }

        let view = peak_view(&*store)?;
        let items = pool.mempool.drain();
        let total = items.len();
        let mut dropped = 0usize;
        for item in items {
            let name = item.name;
            let conditions = match self.validator.validate_spend_bundle(&item.spend_bundle, &view) {
                Ok(c) => c,
                Err(e) => {
                    let reason = e.into_spend_error()?;
                    debug!(%name, %reason, "dropped bundle on revalidation");
                    dropped += 1;
                    continue;
                }
            };
            let revalidated = MempoolItem::new(item.spend_bundle, conditions, item.height_added);
            if let Err(e) = pool.mempool.insert(revalidated) {
                debug!(%name, error = %e, "dropped bundle on revalidation");
                dropped += 1;
            }
        }
        let height = current.map_or(0, |p| p.height);
        info!(height, total, dropped, stale, "revalidated mempool against peak");
        Ok(())
    }

    pub fn get_spendbundle(&self, name: &Hash256) -> Option<SpendBundle> {
        self.pool.lock().mempool.get(name).map(|item| item.spend_bundle.clone())
    }

    pub fn get_mempool_item(&self, name: &Hash256) -> Option<MempoolItem> {
        self.pool.lock().mempool.get(name).cloned()
    }

    /// Every pooled item, keyed by bundle name.
    pub fn get_all_mempool_items(&self) -> HashMap<Hash256, MempoolItem> {
        self.pool.lock().mempool.items().map(|item| (item.name, item.clone())).collect()
    }

    /// Whether `name` was admitted recently.
    pub fn seen(&self, name: &Hash256) -> bool {
        self.pool.lock().seen.contains(name)
    }

    /// Forget `name`, allowing an identical resubmission.
    pub fn remove_seen(&self, name: &Hash256) -> bool {
        self.pool.lock().seen.remove(name)
    }

    /// Drop every bundle spending any of `coin_ids`.
    pub fn remove_by_coin_ids(&self, coin_ids: &[Hash256]) -> Vec<Hash256> {
        let removed = self.pool.lock().mempool.remove_by_coin_ids(coin_ids);
        removed.into_iter().map(|item| item.name).collect()
    }

    pub fn remove_from_pool(&self, names: &[Hash256]) -> Vec<Hash256> {
        let removed = self.pool.lock().mempool.remove_from_pool(names);
        removed.into_iter().map(|item| item.name).collect()
    }

    /// Items for a block at `height` and `timestamp`, best fee per cost
    /// first, fitting within `max_cost` and spending no coin twice.
    pub fn select_for_block(&self, max_cost: u64, height: u64, timestamp: u64) -> Vec<MempoolItem> {
        let pool = self.pool.lock();
        pool.mempool
            .select_for_block(max_cost, height, timestamp)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn total_cost(&self) -> u64 {
        self.pool.lock().mempool.total_cost()
    }

    pub fn total_fees(&self) -> u64 {
        self.pool.lock().mempool.total_fees()
    }

    /// Number of pooled bundles.
    pub fn size(&self) -> usize {
        self.pool.lock().mempool.len()
    }
}

impl std::fmt::Debug for MempoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.pool.lock();
        f.debug_struct("MempoolManager")
            .field("size", &pool.mempool.len())
            .field("total_cost", &pool.mempool.total_cost())
            .finish_non_exhaustive()
    }
}
