//! Fixed-capacity least-recently-used map.
//!
//! Entries live in a slab (`Vec`) and are threaded onto an intrusive doubly linked list by
//! index, most recently used at the head. A key→slot map gives O(1) lookup; promotion,
//! insertion and eviction are O(1) pointer updates.

use ahash::RandomState;
use std::{collections::HashMap, hash::Hash, num::NonZeroUsize};

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used cache with O(1) `get` and `put`.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    map: HashMap<K, usize, RandomState>,
    entries: Vec<Entry<K, V>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity_and_hasher(capacity.get(), RandomState::new()),
            entries: Vec::with_capacity(capacity.get()),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.promote(idx);
        Some(&self.entries[idx].value)
    }

    /// Returns the value for `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|&idx| &self.entries[idx].value)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts or updates `key`, making it most recently used.
    ///
    /// Returns the evicted least-recently-used entry when the insert overflowed capacity.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx].value = value;
            self.promote(idx);
            return None;
        }

        if self.map.len() >= self.capacity.get() {
            let tail = self.tail?;
            self.detach(tail);
            let old_key = std::mem::replace(&mut self.entries[tail].key, key.clone());
            let old_value = std::mem::replace(&mut self.entries[tail].value, value);
            self.map.remove(&old_key);
            self.map.insert(key, tail);
            self.attach_front(tail);
            return Some((old_key, old_value));
        }

        let entry = Entry { key: key.clone(), value, prev: None, next: None };
        let idx = if let Some(slot) = self.free.pop() {
            self.entries[slot] = entry;
            slot
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        };
        self.map.insert(key, idx);
        self.attach_front(idx);
        None
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V>
    where
        V: Default,
    {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        self.free.push(idx);
        Some(std::mem::take(&mut self.entries[idx].value))
    }

    /// Key that would be evicted next.
    #[must_use]
    pub fn least_recent(&self) -> Option<&K> {
        self.tail.map(|idx| &self.entries[idx].key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            cursor = self.entries[idx].next;
            Some(&self.entries[idx].key)
        })
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        self.entries[idx].prev = None;
        self.entries[idx].next = None;
    }

    fn attach_front(&mut self, idx: usize) {
        self.entries[idx].prev = None;
        self.entries[idx].next = self.head;
        if let Some(h) = self.head {
            self.entries[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}
