//! Pull-based view of the event feed.

use super::registry::{SubscriberId, SubscriberRegistry};
use crate::upstream::ForwardedEvent;
use futures_util::Stream;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::mpsc;

/// Handle used to cancel an [`EventStream`] from elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub(crate) SubscriberId);

impl StreamHandle {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.0
    }
}

/// Events for a set of topics, in delivery order.
///
/// Backed by a bounded channel fed from the registry callback. The stream ends once its
/// subscription is cancelled or its buffer overflowed; dropping it unsubscribes.
pub struct EventStream {
    handle: StreamHandle,
    receiver: mpsc::Receiver<ForwardedEvent>,
    registry: Arc<SubscriberRegistry>,
}

impl EventStream {
    pub(crate) fn new(
        id: SubscriberId,
        receiver: mpsc::Receiver<ForwardedEvent>,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        Self { handle: StreamHandle(id), receiver, registry }
    }

    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }
}

impl Stream for EventStream {
    type Item = ForwardedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.handle.0);
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").field("handle", &self.handle).finish_non_exhaustive()
    }
}
