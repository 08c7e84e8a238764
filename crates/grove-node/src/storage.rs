//! RocksDB-backed persistent chain storage.
//!
//! Implements [`ChainDb`] using column families for blocks, block records,
//! the canonical height index, coin records, per-height coin indexes (for
//! rollback), the puzzle-hash index, and metadata.
//!
//! Every mutation is staged in a [`StagedWrite`] overlay that reads through
//! to the database, then written as a single [`WriteBatch`]. A whole reorg
//! (rollback, replay, peak move) therefore lands atomically or not at all.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, SliceTransform, WriteBatch, DB};
use tracing::debug;

use grove_core::block_store::{check_new_chain, BlockStore};
use grove_core::chain_state::{apply_update, ChainDb, ChainDelta, ChainUpdate};
use grove_core::coin_store::{block_coin_records, CoinStore, CoinStoreDelta, RollbackDelta};
use grove_core::error::GroveError;
use grove_core::traits::CoinView;
use grove_core::types::{Block, BlockRecord, Coin, CoinRecord, Hash256};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_RECORDS: &str = "block_records";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_COINS: &str = "coins";
/// Key: confirmed_height (BE) || coin_id.
const CF_COINS_CONFIRMED: &str = "coins_confirmed";
/// Key: spent_height (BE) || coin_id.
const CF_COINS_SPENT: &str = "coins_spent";
/// Key: puzzle_hash || coin_id.
const CF_PUZZLE_INDEX: &str = "puzzle_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_BLOCK_RECORDS,
    CF_HEIGHT_INDEX,
    CF_COINS,
    CF_COINS_CONFIRMED,
    CF_COINS_SPENT,
    CF_PUZZLE_INDEX,
    CF_METADATA,
];

// --- Metadata keys ---

const META_PEAK: &[u8] = b"peak";

fn storage_err(e: impl std::fmt::Display) -> GroveError {
    GroveError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, GroveError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, GroveError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(value)
}

fn hash_from_slice(bytes: &[u8]) -> Result<Hash256, GroveError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| GroveError::Storage(format!("expected 32-byte hash, got {} bytes", bytes.len())))?;
    Ok(Hash256(arr))
}

/// Encode a height as big-endian bytes for ordered iteration.
fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// `height (BE) || coin_id`.
fn height_coin_key(height: u64, coin_id: &Hash256) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&height_key(height));
    key[8..].copy_from_slice(coin_id.as_bytes());
    key
}

/// `puzzle_hash || coin_id`.
fn puzzle_key(puzzle_hash: &Hash256, coin_id: &Hash256) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(puzzle_hash.as_bytes());
    key[32..].copy_from_slice(coin_id.as_bytes());
    key
}

/// RocksDB-backed persistent chain storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist. The store starts
    /// empty; the node connects genesis on first start.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GroveError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                if *name == CF_PUZZLE_INDEX {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(32));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;
        debug!(path = %path.as_ref().display(), "opened chain database");
        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), GroveError> {
        self.db.flush().map_err(storage_err)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, GroveError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GroveError::Storage(format!("missing column family: {name}")))
    }

    fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, GroveError> {
        let cf = self.cf_handle(cf)?;
        self.db.get_cf(cf, key).map_err(storage_err)
    }

    fn get_decoded<T: bincode::Decode<()>>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, GroveError> {
        match self.get_raw(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Coin ids in a `height || coin_id` index at heights strictly above `height`.
    fn coin_ids_above(&self, cf: &str, height: u64) -> Result<Vec<(u64, Hash256)>, GroveError> {
        let Some(start) = height.checked_add(1) else {
            return Ok(Vec::new());
        };
        let cf = self.cf_handle(cf)?;
        let start = height_key(start);
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&start[..], Direction::Forward)) {
            let (key, _) = item.map_err(storage_err)?;
            if key.len() != 40 {
                return Err(GroveError::Storage("malformed coin height index key".into()));
            }
            let mut h = [0u8; 8];
            h.copy_from_slice(&key[..8]);
            out.push((u64::from_be_bytes(h), hash_from_slice(&key[8..])?));
        }
        Ok(out)
    }

    /// Coin ids indexed under `puzzle_hash`.
    fn coin_ids_by_puzzle_hash(&self, puzzle_hash: &Hash256) -> Result<Vec<Hash256>, GroveError> {
        let cf = self.cf_handle(CF_PUZZLE_INDEX)?;
        let prefix = puzzle_hash.as_bytes();
        let mut out = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, prefix) {
            let (key, _) = item.map_err(storage_err)?;
            // prefix_iterator may overshoot
            if key.len() != 64 || &key[..32] != prefix {
                break;
            }
            out.push(hash_from_slice(&key[32..])?);
        }
        Ok(out)
    }

    /// Run `f` against a staged overlay and write its changes as one batch.
    fn staged<R>(
        &mut self,
        f: impl FnOnce(&mut StagedWrite<'_>) -> Result<R, GroveError>,
    ) -> Result<R, GroveError> {
        let mut staged = StagedWrite::new(&*self);
        let out = f(&mut staged)?;
        let batch = staged.into_batch()?;
        self.db.write(batch).map_err(storage_err)?;
        Ok(out)
    }
}

impl CoinView for RocksStore {
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        self.get_decoded(CF_COINS, coin_id.as_bytes())
    }
}

impl CoinStore for RocksStore {
    fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        let mut out = Vec::new();
        for id in self.coin_ids_by_puzzle_hash(puzzle_hash)? {
            if let Some(record) = self.get_coin_record(&id)? {
                if include_spent || !record.is_spent() {
                    out.push(record);
                }
            }
        }
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
        self.staged(|s| s.apply_block(height, timestamp, additions, reward_coins, removals))
    }

    fn rollback_to(&mut self, height: u64) -> Result<RollbackDelta, GroveError> {
        self.staged(|s| s.rollback_to(height))
    }
}

impl BlockStore for RocksStore {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        self.get_decoded(CF_BLOCKS, hash.as_bytes())
    }

    fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError> {
        self.get_decoded(CF_BLOCK_RECORDS, hash.as_bytes())
    }

    fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, GroveError> {
        self.get_raw(CF_HEIGHT_INDEX, &height_key(height))?
            .map(|bytes| hash_from_slice(&bytes))
            .transpose()
    }

    fn add_block(&mut self, block: &Block) -> Result<BlockRecord, GroveError> {
        self.staged(|s| s.add_block(block))
    }

    fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        match self.get_raw(CF_METADATA, META_PEAK)? {
            Some(bytes) => self.get_block_record(&hash_from_slice(&bytes)?),
            None => Ok(None),
        }
    }

    fn set_peak(&mut self, fork_height: Option<u64>, new_chain: &[Hash256]) -> Result<(), GroveError> {
        self.staged(|s| s.set_peak(fork_height, new_chain))
    }
}

impl ChainDb for RocksStore {
    fn commit(&mut self, update: &ChainUpdate) -> Result<ChainDelta, GroveError> {
        self.staged(|s| apply_update(s, update))
    }
}

enum StagedOp {
    Put(&'static str, Vec<u8>, Vec<u8>),
    Delete(&'static str, Vec<u8>),
}

/// Pending changes layered over a [`RocksStore`].
///
/// Reads see staged values first. Index scans merge the database with
/// staged index entries; stale hits are filtered by re-reading the coin
/// record through the overlay.
struct StagedWrite<'a> {
    store: &'a RocksStore,
    ops: Vec<StagedOp>,
    /// `None` marks a deleted record.
    coins: HashMap<Hash256, Option<CoinRecord>>,
    confirmed: BTreeMap<u64, Vec<Hash256>>,
    spent: BTreeMap<u64, Vec<Hash256>>,
    by_puzzle_hash: HashMap<Hash256, HashSet<Hash256>>,
    blocks: HashMap<Hash256, (Block, BlockRecord)>,
    height_index: BTreeMap<u64, Option<Hash256>>,
    peak: Option<Option<Hash256>>,
}

impl<'a> StagedWrite<'a> {
    fn new(store: &'a RocksStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
            coins: HashMap::new(),
            confirmed: BTreeMap::new(),
            spent: BTreeMap::new(),
            by_puzzle_hash: HashMap::new(),
            blocks: HashMap::new(),
            height_index: BTreeMap::new(),
            peak: None,
        }
    }

    fn put(&mut self, cf: &'static str, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.ops.push(StagedOp::Put(cf, key.into(), value));
    }

    fn delete(&mut self, cf: &'static str, key: impl Into<Vec<u8>>) {
        self.ops.push(StagedOp::Delete(cf, key.into()));
    }

    fn into_batch(self) -> Result<WriteBatch, GroveError> {
        let mut batch = WriteBatch::default();
        for op in &self.ops {
            match op {
                StagedOp::Put(cf, key, value) => batch.put_cf(self.store.cf_handle(cf)?, key, value),
                StagedOp::Delete(cf, key) => batch.delete_cf(self.store.cf_handle(cf)?, key),
            }
        }
        Ok(batch)
    }

    fn write_coin(&mut self, record: CoinRecord, is_new: bool) -> Result<(), GroveError> {
        let id = record.coin_id();
        if is_new {
            self.put(CF_COINS_CONFIRMED, height_coin_key(record.confirmed_height, &id), vec![]);
            self.confirmed.entry(record.confirmed_height).or_default().push(id);
            self.put(CF_PUZZLE_INDEX, puzzle_key(&record.coin.puzzle_hash, &id), vec![]);
            self.by_puzzle_hash.entry(record.coin.puzzle_hash).or_default().insert(id);
        }
        if let Some(h) = record.spent_height {
            self.put(CF_COINS_SPENT, height_coin_key(h, &id), vec![]);
            self.spent.entry(h).or_default().push(id);
        }
        self.put(CF_COINS, id.as_bytes().to_vec(), encode(&record)?);
        self.coins.insert(id, Some(record));
        Ok(())
    }

    /// Index entries above `height`, from disk and from this write. Staged
    /// entries above `height` are dropped from the overlay index.
    fn take_ids_above(&mut self, cf: &'static str, height: u64) -> Result<Vec<(u64, Hash256)>, GroveError> {
        let mut ids = self.store.coin_ids_above(cf, height)?;
        if let Some(above) = height.checked_add(1) {
            let staged = match cf {
                CF_COINS_SPENT => &mut self.spent,
                _ => &mut self.confirmed,
            };
            for (h, list) in staged.split_off(&above) {
                ids.extend(list.into_iter().map(|id| (h, id)));
            }
        }
        Ok(ids)
    }
}

impl CoinView for StagedWrite<'_> {
    fn get_coin_record(&self, coin_id: &Hash256) -> Result<Option<CoinRecord>, GroveError> {
        match self.coins.get(coin_id) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get_coin_record(coin_id),
        }
    }
}

impl CoinStore for StagedWrite<'_> {
    fn get_coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash256,
        include_spent: bool,
    ) -> Result<Vec<CoinRecord>, GroveError> {
        let mut ids: HashSet<Hash256> = self.store.coin_ids_by_puzzle_hash(puzzle_hash)?.into_iter().collect();
        if let Some(staged) = self.by_puzzle_hash.get(puzzle_hash) {
            ids.extend(staged.iter().copied());
        }
        let mut out = Vec::new();
        for id in ids {
            if let Some(record) = self.get_coin_record(&id)? {
                if include_spent || !record.is_spent() {
                    out.push(record);
                }
            }
        }
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
        let (records, delta) = block_coin_records(&*self, height, timestamp, additions, reward_coins, removals)?;
        let created: HashSet<Hash256> = delta.created.iter().copied().collect();
        for record in records {
            let is_new = created.contains(&record.coin_id());
            self.write_coin(record, is_new)?;
        }
        Ok(delta)
    }

    fn rollback_to(&mut self, height: u64) -> Result<RollbackDelta, GroveError> {
        let mut delta = RollbackDelta::default();

        for (h, id) in self.take_ids_above(CF_COINS_SPENT, height)? {
            self.delete(CF_COINS_SPENT, height_coin_key(h, &id));
            if let Some(mut record) = self.get_coin_record(&id)? {
                if record.spent_height.is_some_and(|s| s > height) {
                    record.spent_height = None;
                    self.put(CF_COINS, id.as_bytes().to_vec(), encode(&record)?);
                    self.coins.insert(id, Some(record));
                    delta.unspent.push(id);
                }
            }
        }

        for (h, id) in self.take_ids_above(CF_COINS_CONFIRMED, height)? {
            self.delete(CF_COINS_CONFIRMED, height_coin_key(h, &id));
            if let Some(record) = self.get_coin_record(&id)? {
                self.delete(CF_COINS, id.as_bytes().to_vec());
                self.delete(CF_PUZZLE_INDEX, puzzle_key(&record.coin.puzzle_hash, &id));
                if let Some(set) = self.by_puzzle_hash.get_mut(&record.coin.puzzle_hash) {
                    set.remove(&id);
                }
                self.coins.insert(id, None);
                delta.removed.push(id);
            }
        }

        let removed: HashSet<Hash256> = delta.removed.iter().copied().collect();
        delta.unspent.retain(|id| !removed.contains(id));
        Ok(delta)
    }
}

impl BlockStore for StagedWrite<'_> {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, GroveError> {
        match self.blocks.get(hash) {
            Some((block, _)) => Ok(Some(block.clone())),
            None => self.store.get_block(hash),
        }
    }

    fn get_block_record(&self, hash: &Hash256) -> Result<Option<BlockRecord>, GroveError> {
        match self.blocks.get(hash) {
            Some((_, record)) => Ok(Some(*record)),
            None => self.store.get_block_record(hash),
        }
    }

    fn get_hash_at_height(&self, height: u64) -> Result<Option<Hash256>, GroveError> {
        match self.height_index.get(&height) {
            Some(staged) => Ok(*staged),
            None => self.store.get_hash_at_height(height),
        }
    }

    fn add_block(&mut self, block: &Block) -> Result<BlockRecord, GroveError> {
        let record = BlockRecord::from_header(&block.header);
        let key = record.header_hash.as_bytes().to_vec();
        self.put(CF_BLOCKS, key.clone(), encode(block)?);
        self.put(CF_BLOCK_RECORDS, key, encode(&record)?);
        self.blocks.insert(record.header_hash, (block.clone(), record));
        Ok(record)
    }

    fn get_peak(&self) -> Result<Option<BlockRecord>, GroveError> {
        match self.peak {
            Some(Some(hash)) => self.get_block_record(&hash),
            Some(None) => Ok(None),
            None => self.store.get_peak(),
        }
    }

    fn set_peak(&mut self, fork_height: Option<u64>, new_chain: &[Hash256]) -> Result<(), GroveError> {
        let records = check_new_chain(&*self, fork_height, new_chain)?;
        let first = fork_height.map_or(0, |h| h + 1);
        if let Some(old) = self.get_peak()? {
            for h in first..=old.height {
                self.delete(CF_HEIGHT_INDEX, height_key(h).to_vec());
                self.height_index.insert(h, None);
            }
        }
        for record in &records {
            self.put(CF_HEIGHT_INDEX, height_key(record.height).to_vec(), record.header_hash.as_bytes().to_vec());
            self.height_index.insert(record.height, Some(record.header_hash));
        }
        let peak = match records.last() {
            Some(record) => Some(record.header_hash),
            None => match fork_height {
                Some(h) => self.get_hash_at_height(h)?,
                None => None,
            },
        };
        match peak {
            Some(hash) => self.put(CF_METADATA, META_PEAK.to_vec(), hash.as_bytes().to_vec()),
            None => self.delete(CF_METADATA, META_PEAK.to_vec()),
        }
        self.peak = Some(peak);
        Ok(())
    }
}
