//! Approximate "have I seen this already?" caches.
//!
//! [`DedupCache`] forgets items by age using two alternating generations. It remembers an
//! item for at least half of the configured window and at most the full window. Equality is
//! hash-only: a 64-bit collision makes two different items look identical.
//!
//! [`BoundedDedupCache`] forgets by count instead, evicting the least recently seen hash
//! once capacity is reached.

use super::lru::LruCache;
use ahash::RandomState;
use std::{collections::HashSet, hash::Hash, num::NonZeroUsize, time::Duration};
use tokio::time::Instant;

#[derive(Debug)]
struct Generation {
    created: Instant,
    hashes: HashSet<u64, RandomState>,
}

impl Generation {
    fn new(created: Instant) -> Self {
        Self { created, hashes: HashSet::with_hasher(RandomState::new()) }
    }

    fn is_live(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.created) <= window
    }
}

/// Time-windowed membership cache made of two hash-set generations.
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    generations: [Generation; 2],
    current: usize,
    hasher: RandomState,
}

impl DedupCache {
    /// Creates a cache remembering items for roughly `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let now = Instant::now();
        Self {
            window,
            generations: [Generation::new(now), Generation::new(now)],
            current: 0,
            hasher: RandomState::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns whether `value` was recorded within the window.
    #[must_use]
    pub fn contains<T: Hash + ?Sized>(&self, value: &T) -> bool {
        self.contains_hash_at(self.hasher.hash_one(value), Instant::now())
    }

    /// Records `value`.
    pub fn insert<T: Hash + ?Sized>(&mut self, value: &T) {
        let hash = self.hasher.hash_one(value);
        self.insert_hash_at(hash, Instant::now());
    }

    /// Records `value` unless it is already known.
    ///
    /// Returns `true` when the value was new and has been recorded.
    pub fn add_if_absent<T: Hash + ?Sized>(&mut self, value: &T) -> bool {
        let hash = self.hasher.hash_one(value);
        self.add_hash_if_absent_at(hash, Instant::now())
    }

    /// Number of hashes currently held, including not yet reclaimed stale ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generations.iter().map(|g| g.hashes.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains_hash_at(&self, hash: u64, now: Instant) -> bool {
        self.generations.iter().any(|generation| {
            generation.is_live(now, self.window) && generation.hashes.contains(&hash)
        })
    }

    fn insert_hash_at(&mut self, hash: u64, now: Instant) {
        let half = self.window / 2;
        let current_age = now.saturating_duration_since(self.generations[self.current].created);

        if current_age > half {
            let next = 1 - self.current;
            let generation = &mut self.generations[next];
            generation.hashes.clear();
            generation.created = now;
            self.current = next;
        }

        self.generations[self.current].hashes.insert(hash);
    }

    fn add_hash_if_absent_at(&mut self, hash: u64, now: Instant) -> bool {
        if self.contains_hash_at(hash, now) {
            return false;
        }
        self.insert_hash_at(hash, now);
        true
    }
}

/// Count-bounded membership cache backed by [`LruCache`].
#[derive(Debug)]
pub struct BoundedDedupCache {
    entries: LruCache<u64, ()>,
    hasher: RandomState,
}

impl BoundedDedupCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { entries: LruCache::new(capacity), hasher: RandomState::new() }
    }

    /// Records `value` unless it is already known. Seeing a known value refreshes it.
    pub fn add_if_absent<T: Hash + ?Sized>(&mut self, value: &T) -> bool {
        let hash = self.hasher.hash_one(value);
        if self.entries.get(&hash).is_some() {
            return false;
        }
        self.entries.put(hash, ());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
