//! Deduplication caches for upstream events.
//!
//! Every node delivers the same event, so the relay remembers what it already forwarded:
//!
//! - [`DedupCache`]: time-windowed, two alternating hash generations. An entry is remembered
//!   for at least half the window and at most the full window.
//! - [`BoundedDedupCache`]: count-bounded, backed by [`LruCache`].
//!
//! Both store 64-bit hashes only, never the values themselves.

pub mod dedup;
pub mod lru;

pub use dedup::{BoundedDedupCache, DedupCache};
pub use lru::LruCache;
