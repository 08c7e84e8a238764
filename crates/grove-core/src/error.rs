//! Error types for the Grove node core.
use thiserror::Error;

use crate::types::Hash256;

/// Reasons a spend bundle (or the spends inside a block) fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpendError {
    #[error("unknown coin: {0}")] UnknownCoin(Hash256),
    #[error("coin already spent: {0}")] CoinAlreadySpent(Hash256),
    #[error("coin spent twice in one bundle: {0}")] DuplicateSpend(Hash256),
    #[error("coin created twice: {0}")] DuplicateOutput(Hash256),
    #[error("puzzle reveal does not hash to coin puzzle hash for {0}")] WrongPuzzleHash(Hash256),
    #[error("malformed puzzle reveal for {0}")] InvalidPuzzle(Hash256),
    #[error("malformed solution for {0}")] InvalidSolution(Hash256),
    #[error("aggregated signature does not authorize the consumed coins")] BadAggregateSignature,
    #[error("cost exceeded: {cost} > {max}")] CostExceeded { cost: u64, max: u64 },
    #[error("created value {created} exceeds spent value {spent}")] MintingCoin { spent: u64, created: u64 },
    #[error("value overflow")] ValueOverflow,
    #[error("empty spend bundle")] EmptyBundle,
    #[error("reserved fee {reserved} exceeds available fee {fee}")] ReserveFeeTooHigh { reserved: u64, fee: u64 },
    #[error("height assertion {required} not met at {height}")] AssertHeightFailed { required: u64, height: u64 },
    #[error("time assertion {required} not met at {timestamp}")] AssertSecondsFailed { required: u64, timestamp: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid proof of work")] InvalidProof,
    #[error("invalid prev hash")] InvalidPrevHash,
    #[error("invalid height: expected {expected}, got {got}")] InvalidHeight { expected: u64, got: u64 },
    #[error("invalid weight: expected {expected}, got {got}")] InvalidWeight { expected: u128, got: u128 },
    #[error("difficulty {got} below minimum {min}")] DifficultyTooLow { got: u64, min: u64 },
    #[error("timestamp too far in the future: {0}")] TimestampTooFar(u64),
    #[error("timestamp not after parent")] TimestampNotAfterParent,
    #[error("invalid transactions root")] InvalidTransactionsRoot,
    #[error("invalid reward: got {got}, allowed {allowed}")] InvalidReward { got: u64, allowed: u64 },
    #[error("reward coin {0} has the wrong parent")] InvalidRewardParent(Hash256),
    #[error("genesis block may not spend coins")] GenesisWithSpends,
    #[error("block {0} is not this network's genesis")] WrongGenesis(Hash256),
    #[error("block cost {cost} exceeds {max}")] CostExceeded { cost: u64, max: u64 },
    #[error("coin {0} already exists")] DuplicateCoin(Hash256),
    #[error("spend error: {0}")] Spend(#[from] SpendError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("bundle already in pool: {0}")] AlreadyExists(Hash256),
    #[error("conflicts with pool bundle {existing}")] Conflict { existing: Hash256 },
    #[error("pool full")] PoolFull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("block not found: {0}")] BlockNotFound(Hash256),
    #[error("no canonical block at height {0}")] NoBlockAtHeight(u64),
    #[error("missing coin: {0}")] MissingCoin(Hash256),
    #[error("double spend of coin: {0}")] DoubleSpend(Hash256),
    #[error("duplicate coin: {0}")] DuplicateCoin(Hash256),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("rollback target {target} above peak {peak}")] RollbackAbovePeak { target: u64, peak: u64 },
    #[error("chain already has a genesis block")] GenesisExists,
}

#[derive(Error, Debug)]
pub enum GroveError {
    #[error(transparent)] Spend(#[from] SpendError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error("storage: {0}")] Storage(String),
    #[error("config: {0}")] Config(String),
}

impl GroveError {
    /// Split a validation outcome into the block rule it broke, or hand back
    /// the underlying fault.
    pub fn into_block_error(self) -> Result<BlockError, GroveError> {
        match self {
            Self::Block(e) => Ok(e),
            Self::Spend(e) => Ok(BlockError::Spend(e)),
            other => Err(other),
        }
    }

    /// Like [`into_block_error`](Self::into_block_error) for bundle validation.
    pub fn into_spend_error(self) -> Result<SpendError, GroveError> {
        match self {
            Self::Spend(e) => Ok(e),
            Self::Block(BlockError::Spend(e)) => Ok(e),
            other => Err(other),
        }
    }
}
