//! Per-key exponential backoff.
//!
//! Each key tracks how many consecutive failures it has accumulated. The delay grows as
//! `start * factor^attempts` until it reaches `max`; from then on the attempt counter stops
//! growing so it cannot overflow during long outages.

use dashmap::DashMap;
use std::{hash::Hash, time::Duration};

/// Exponential backoff timers keyed by `K`.
#[derive(Debug)]
pub struct BackoffManager<K: Eq + Hash> {
    start: Duration,
    max: Duration,
    factor: f64,
    attempts: DashMap<K, u32>,
}

impl<K: Eq + Hash> BackoffManager<K> {
    /// Creates a backoff manager.
    ///
    /// `factor` values below 1.0 are treated as 1.0 so delays never shrink.
    #[must_use]
    pub fn new(start: Duration, max: Duration, factor: f64) -> Self {
        Self { start, max: max.max(start), factor: factor.max(1.0), attempts: DashMap::new() }
    }

    /// Returns the delay to wait before the next attempt for `key` and records the attempt.
    pub fn backoff(&self, key: K) -> Duration {
        let mut attempts = self.attempts.entry(key).or_insert(0);
        let delay = self.delay_for(*attempts);
        if delay < self.max {
            *attempts = attempts.saturating_add(1);
        }
        delay
    }

    /// Delay the next call to [`Self::backoff`] would return, without recording anything.
    #[must_use]
    pub fn peek(&self, key: &K) -> Duration {
        self.delay_for(self.attempts.get(key).map_or(0, |a| *a))
    }

    /// Forgets all failures recorded for `key`.
    pub fn reset(&self, key: &K) {
        self.attempts.remove(key);
    }

    #[must_use]
    pub fn attempts(&self, key: &K) -> u32 {
        self.attempts.get(key).map_or(0, |a| *a)
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.start.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs).min(self.max)
    }
}
