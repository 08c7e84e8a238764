//! Bounded record of recently seen spend bundle names.
//!
//! Used to short-circuit resubmissions before paying for validation. It
//! is advisory: a name here says nothing about whether the bundle is in
//! the pool or on chain. Entries leave on expiry, on capacity pressure
//! (least recently inserted first), or by explicit removal.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::Hash256;

/// Default number of names remembered.
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Default time a name is remembered, in seconds.
pub const DEFAULT_SEEN_TTL_SECS: u64 = 600;

pub type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// LRU of bundle names, each stamped with the time it was inserted.
///
/// Lookups use `peek` so recency follows insertion only; the least
/// recently used end is therefore also the oldest.
pub struct SeenSet {
    cache: LruCache<Hash256, u64>,
    ttl_secs: u64,
    clock: Clock,
}

impl SeenSet {
    /// Create a set using wall-clock time.
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self::with_clock(capacity, ttl_secs, Box::new(|| chrono::Utc::now().timestamp() as u64))
    }

    /// Create a set with an injected clock returning Unix seconds.
    pub fn with_clock(capacity: usize, ttl_secs: u64, clock: Clock) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { cache: LruCache::new(capacity), ttl_secs, clock }
    }

    pub fn insert(&mut self, name: Hash256) {
        let now = (self.clock)();
        self.prune_expired(now);
        self.cache.put(name, now);
    }

    pub fn contains(&self, name: &Hash256) -> bool {
        let now = (self.clock)();
        self.cache.peek(name).is_some_and(|&at| self.is_live(at, now))
    }

    /// Forget `name`. Returns whether it was present and unexpired.
    pub fn remove(&mut self, name: &Hash256) -> bool {
        let now = (self.clock)();
        self.cache.pop(name).is_some_and(|at| self.is_live(at, now))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn is_live(&self, inserted_at: u64, now: u64) -> bool {
        now.saturating_sub(inserted_at) < self.ttl_secs
    }

    fn prune_expired(&mut self, now: u64) {
        while let Some((_, &at)) = self.cache.peek_lru() {
            if self.is_live(at, now) {
                break;
            }
            self.cache.pop_lru();
        }
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY, DEFAULT_SEEN_TTL_SECS)
    }
}

impl fmt::Debug for SeenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeenSet")
            .field("len", &self.cache.len())
            .field("capacity", &self.cache.cap())
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}
