//! Fan-in of upstream events.
//!
//! Every connection forwards what it decodes; the distributor drops events from excluded
//! connections, drops repeats already delivered by another connection and hands first
//! sightings to the subscribers of the event's topic.

use super::registry::SubscriberRegistry;
use crate::{
    cache::{BoundedDedupCache, DedupCache},
    events::BeaconEvent,
    metrics::{EventOutcome, MetricsCollector},
    upstream::{ConnectionId, ForwardedEvent},
};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashSet, num::NonZeroUsize, sync::Arc, time::Duration};
use tracing::trace;

/// Which dedup cache remembers delivered events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStrategy {
    /// Remember events for a time window.
    Windowed(Duration),
    /// Remember a fixed number of most recent events.
    Bounded(NonZeroUsize),
}

impl Default for DedupStrategy {
    fn default() -> Self {
        Self::Windowed(Duration::from_secs(600))
    }
}

enum EventDedup {
    Windowed(DedupCache),
    Bounded(BoundedDedupCache),
}

impl EventDedup {
    fn new(strategy: DedupStrategy) -> Self {
        match strategy {
            DedupStrategy::Windowed(window) => Self::Windowed(DedupCache::new(window)),
            DedupStrategy::Bounded(capacity) => Self::Bounded(BoundedDedupCache::new(capacity)),
        }
    }

    fn add_if_absent(&mut self, event: &BeaconEvent) -> bool {
        match self {
            Self::Windowed(cache) => cache.add_if_absent(event),
            Self::Bounded(cache) => cache.add_if_absent(event),
        }
    }
}

/// Shared set of connections currently outside the trusted set.
pub type ExclusionSet = Arc<RwLock<HashSet<ConnectionId>>>;

pub struct EventDistributor {
    excluded: ExclusionSet,
    dedup: Mutex<EventDedup>,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl EventDistributor {
    #[must_use]
    pub fn new(
        excluded: ExclusionSet,
        strategy: DedupStrategy,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { excluded, dedup: Mutex::new(EventDedup::new(strategy)), registry, metrics }
    }

    /// Delivers `event` to the subscribers of its topic unless it must be dropped.
    ///
    /// Returns `true` if the event was delivered.
    pub fn distribute(&self, event: ForwardedEvent) -> bool {
        if self.excluded.read().contains(&event.connection) {
            trace!(
                connection = event.connection,
                topic = %event.topic,
                "dropping event from excluded node"
            );
            self.metrics.record_event(event.topic, EventOutcome::Excluded);
            return false;
        }

        if !self.dedup.lock().add_if_absent(&event.event) {
            self.metrics.record_event(event.topic, EventOutcome::Duplicate);
            return false;
        }

        self.metrics.record_event(event.topic, EventOutcome::Delivered);
        for callback in self.registry.callbacks_for(event.topic) {
            callback(event.clone());
        }
        true
    }
}

impl std::fmt::Debug for EventDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDistributor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
