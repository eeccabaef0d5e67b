//! Topic subscribers of the relay.
//!
//! Every subscriber has a random id and a callback, and sits in one bucket per topic it
//! asked for. All mutations happen under a single guard; delivery clones the callbacks out of
//! the bucket and invokes them after the guard is released, so a callback may subscribe or
//! unsubscribe without deadlocking.

use crate::{events::EventTopic, upstream::EventCallback};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Identifier handed out by [`SubscriberRegistry::subscribe`].
pub type SubscriberId = Uuid;

#[derive(Default)]
struct Buckets {
    by_topic: HashMap<EventTopic, HashMap<SubscriberId, EventCallback>>,
    ids: HashSet<SubscriberId>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    buckets: Mutex<Buckets>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every topic in `topics` and returns its id.
    pub fn subscribe(&self, topics: &[EventTopic], callback: EventCallback) -> SubscriberId {
        let id = Uuid::new_v4();
        let mut buckets = self.buckets.lock();
        for topic in topics {
            buckets.by_topic.entry(*topic).or_default().insert(id, callback.clone());
        }
        buckets.ids.insert(id);
        id
    }

    /// Removes `id` from every topic bucket. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, known) = {
            let mut buckets = self.buckets.lock();
            let removed: Vec<EventCallback> =
                buckets.by_topic.values_mut().filter_map(|bucket| bucket.remove(&id)).collect();
            buckets.by_topic.retain(|_, bucket| !bucket.is_empty());
            (removed, buckets.ids.remove(&id))
        };
        // Callbacks may own channel senders; drop them outside the guard.
        drop(removed);
        known
    }

    /// Callbacks currently registered for `topic`.
    #[must_use]
    pub fn callbacks_for(&self, topic: EventTopic) -> Vec<EventCallback> {
        self.buckets
            .lock()
            .by_topic
            .get(&topic)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.buckets.lock().ids.len()
    }

    #[must_use]
    pub fn topic_subscriber_count(&self, topic: EventTopic) -> usize {
        self.buckets.lock().by_topic.get(&topic).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.buckets.lock().ids.contains(&id)
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
