//! Block storage interface and in-memory implementation.
//!
//! Every block that passes validation is stored, canonical or not. The
//! height index maps heights to the canonical chain only and is rewritten
//! by [`BlockStore::set_peak`] when the peak moves.

use std::collections::{BTreeMap, HashMap};

use crate::error::{ChainStateError, GroveError};
use crate::types::{Block, BlockRecord, Hash256};

pub trait BlockStore: Send + Sync {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError>;

    fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError>;

    /// Canonical block hash at `height`.
    fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, GroveError>;

    /// Store a block without touching the canonical chain.
    fn add_block(&mut self, block: &Block) -> Result<BlockRecord, GroveError>;

    /// Current peak, or `None` before genesis.
    fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError>;

    /// Make `new_chain` canonical above `fork_height` (from genesis when `None`).
    ///
    /// `new_chain` lists stored block hashes in height order. Height index
    /// entries above the new peak are dropped.
    fn set_peak(&mut self, fork_height: Option<u64>, new_chain: &[Hash256]) -> Result<(), GroveError>;

    fn get_block_at_height(&self, height: u64) -> Result<Option<Block>, GroveError> {
        match self.get_hash_at_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    fn contains_block(&self, hash: &Hash256) -> Result<bool, GroveError> {
        Ok(self.get_block_record(hash)?.is_some())
    }

    /// Whether `record` is on the canonical chain.
    fn is_canonical(&self, record: &BlockRecord) -> Result<bool, GroveError> {
        Ok(self.get_hash_at_height(record.height)? == Some(record.header_hash))
    }
}

/// Check that `new_chain` links up and sits directly on `fork_height`.
///
/// Returns the records of the new chain in order.
pub fn check_new_chain<S: BlockStore + ?Sized>(
    store: &S,
    fork_height: Option<u64>,
    new_chain: &[Hash256],
) -> Result<Vec<BlockRecord>, GroveError> {
    let mut expected_height = fork_height.map_or(0, |h| h + 1);
    let mut expected_prev = match fork_height {
        Some(h) => store
            .get_hash_at_height(h)?
            .ok_or(ChainStateError::NoBlockAtHeight(h))?,
        None => Hash256::ZERO,
    };
    let mut records = Vec::with_capacity(new_chain.len());
    for hash in new_chain {
        let record = store
            .get_block_record(hash)?
            .ok_or(ChainStateError::BlockNotFound(*hash))?;
        if record.height != expected_height {
            return Err(ChainStateError::HeightMismatch { expected: expected_height, got: record.height }.into());
        }
        if record.prev_hash != expected_prev {
            return Err(ChainStateError::BlockNotFound(record.prev_hash).into());
        }
        expected_height += 1;
        expected_prev = record.header_hash;
        records.push(record);
    }
    Ok(records)
}

/// In-memory block store for tests and ephemeral nodes.
#[derive(Clone, Debug, Default)]
pub struct MemoryBlockStore {
    blocks: HashMap<Hash256, Block>,
    records: HashMap<Hash256, BlockRecord>,
    height_index: BTreeMap<u64, Hash256>,
    peak: Option<Hash256>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks, canonical or not.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl BlockStore for MemoryBlockStore {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError> {
        Ok(self.records.get(hash).copied())
    }

    fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, GroveError> {
        Ok(self.height_index.get(&height).copied())
    }

    fn add_block(&mut self, block: &Block) -> Result<BlockRecord, GroveError> {
        let record = BlockRecord::from_header(&block.header);
        self.records.insert(record.header_hash, record);
        self.blocks.insert(record.header_hash, block.clone());
        Ok(record)
    }

    fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        Ok(self.peak.and_then(|h| self.records.get(&h).copied()))
    }

    fn set_peak(&mut self, fork_height: Option<u64>, new_chain: &[Hash256]) -> Result<(), GroveError> {
        let records = check_new_chain(self, fork_height, new_chain)?;
        let first = fork_height.map_or(0, |h| h + 1);
        self.height_index.retain(|h, _| *h < first);
        for record in &records {
            self.height_index.insert(record.height, record.header_hash);
        }
        self.peak = self.height_index.last_key_value().map(|(_, h)| *h);
        Ok(())
    }
}
