//! Trait interfaces between the node crates.
//!
//! - [`CoinView`]: read access to a coin set (stores and fork overlays implement)
//! - [`PuzzleRunner`]: executes one coin spend (grove-consensus implements)
//! - [`ConsensusValidator`]: block and bundle validation (grove-consensus implements)

use chia_bls::PublicKey;

use crate::constants::ConsensusConstants;
use crate::error::{GroveError, SpendError};
use crate::types::{Block, BlockHeader, BlockRecord, Coin, CoinRecord, CoinSpend, Hash256, SpendBundle};

/// Read-only view of a coin set.
pub trait CoinView {
    /// Look up a coin record by id. Spent coins are returned with `spent_height` set.
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError>;
}

/// Result of running a single coin spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpendConditions {
    pub coin_id: Hash256,
    pub created: Vec<Coin>,
    pub reserve_fee: u64,
    pub assert_height: Option<u64>,
    pub assert_seconds: Option<u64>,
    /// Public keys and messages this spend requires signatures for.
    pub agg_sig: Vec<(PublicKey, Vec<u8>)>,
    pub cost: u64,
}

/// Executes coin spends, turning a puzzle reveal and solution into conditions.
///
/// The puzzle language is opaque to the node core; only its outputs matter.
pub trait PuzzleRunner: Send + Sync {
    /// Run one spend, charging at most `max_cost`.
    fn run_spend(&self, spend: &CoinSpend, max_cost: u64) -> Result<SpendConditions, SpendError>;
}

/// Aggregate effect of a validated spend bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleConditions {
    pub removals: Vec<Coin>,
    pub additions: Vec<Coin>,
    /// Value of removals minus value of additions.
    pub fee: u64,
    pub cost: u64,
    /// Earliest height the bundle may be included at (0 if unconstrained).
    pub assert_height: u64,
    /// Earliest block timestamp the bundle may be included at.
    pub assert_seconds: u64,
}

/// Coin-set changes of a block that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedBlock {
    pub additions: Vec<Coin>,
    pub removals: Vec<Hash256>,
    pub cost: u64,
    pub fees: u64,
}

/// Consensus validation of headers, blocks, and pending spend bundles.
///
/// Validation failures surface as [`GroveError::Block`] or [`GroveError::Spend`];
/// any other variant is a fault in the coin view (e.g. storage) and says
/// nothing about the candidate's validity. Use
/// [`GroveError::into_block_error`] to tell the two apart.
pub trait ConsensusValidator: Send + Sync {
    fn constants(&self) -> &ConsensusConstants;

    /// Context-free header checks plus linkage to `parent` (`None` for genesis).
    fn validate_header(&self, header: &BlockHeader, parent: Option<&BlockRecord>) -> Result<(), GroveError>;

    /// Full validation of `block` against the coin set as of its parent.
    fn validate_block(
        &self,
        block: &Block,
        parent: Option<&BlockRecord>,
        coins: &dyn CoinView,
    ) -> Result<ValidatedBlock, GroveError>;

    /// Validate a pending bundle against the current coin set.
    ///
    /// Height and time assertions are reported, not enforced; they bound
    /// when the bundle may be included, not whether it may wait in the pool.
    fn validate_spend_bundle(
        &self,
        bundle: &SpendBundle,
        coins: &dyn CoinView,
    ) -> Result<BundleConditions, GroveError>;
}
