//! Integration tests for the merged event feed.
//!
//! Every node forwards what it receives; subscribers must see each event once, never see
//! events from excluded nodes, and stop receiving as soon as they unsubscribe. A reader that
//! stops polling is cut off instead of buffering without limit.

use crate::mock_infrastructure::{
    block_event, other_genesis, service_with, wait_for, MockBeaconClient,
};
use futures_util::StreamExt;
use relay_core::{
    aggregation::{AggregationService, EventStream},
    events::EventTopic,
    upstream::{ForwardedEvent, HEALTH_MAX_AGE},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    nodes: Vec<Arc<MockBeaconClient>>,
    service: Arc<AggregationService>,
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Running {
    async fn start(count: usize, prepare: impl Fn(usize, &MockBeaconClient)) -> Self {
        let nodes: Vec<_> =
            (0..count).map(|i| MockBeaconClient::new(&format!("http://node-{i}"))).collect();
        for (i, node) in nodes.iter().enumerate() {
            prepare(i, node.as_ref());
        }

        let service = service_with(&nodes);
        let (shutdown, _) = broadcast::channel(1);
        let handles = service.start_with_shutdown(&shutdown);

        let ready = wait_for(WAIT, || {
            service.connections().iter().all(|conn| {
                conn.is_healthy(HEALTH_MAX_AGE) &&
                    conn.subscribed_topics().len() == conn.topics().len()
            })
        })
        .await;
        assert!(ready, "connections did not come up");
        service.trusted_connections();

        Self { nodes, service, shutdown, handles }
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        for handle in self.handles {
            tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        }
    }
}

async fn next_event(stream: &mut EventStream) -> Option<ForwardedEvent> {
    tokio::time::timeout(Duration::from_millis(200), stream.next()).await.ok().flatten()
}

#[tokio::test]
async fn test_same_event_from_every_node_delivered_once() {
    let running = Running::start(3, |_, _| {}).await;
    let mut stream = running.service.event_stream(&[EventTopic::Block]);

    for node in &running.nodes {
        assert_eq!(node.emit(EventTopic::Block, &block_event(7)), 1);
    }

    let first = next_event(&mut stream).await.expect("event delivered");
    assert_eq!(first.topic, EventTopic::Block);
    assert_eq!(&*first.data, block_event(7).as_str());
    assert!(next_event(&mut stream).await.is_none());

    running.nodes[1].emit(EventTopic::Block, &block_event(8));
    let second = next_event(&mut stream).await.expect("new event delivered");
    assert_eq!(&*second.data, block_event(8).as_str());

    running.stop().await;
}

#[tokio::test]
async fn test_subscribers_only_get_their_topics() {
    let running = Running::start(1, |_, _| {}).await;
    let mut heads = running.service.event_stream(&[EventTopic::Head]);
    let mut blocks = running.service.event_stream(&[EventTopic::Block]);

    running.nodes[0].emit(EventTopic::Block, &block_event(9));

    assert!(next_event(&mut blocks).await.is_some());
    assert!(next_event(&mut heads).await.is_none());

    running.stop().await;
}

#[tokio::test]
async fn test_events_from_excluded_node_are_dropped() {
    let running = Running::start(3, |i, node| {
        if i == 2 {
            node.set_genesis(other_genesis());
        }
    })
    .await;
    assert!(running.service.is_excluded(2));
    let mut stream = running.service.event_stream(&[EventTopic::Block]);

    running.nodes[2].emit(EventTopic::Block, &block_event(10));
    assert!(next_event(&mut stream).await.is_none());

    // The excluded copy did not poison the dedup cache.
    running.nodes[0].emit(EventTopic::Block, &block_event(10));
    assert!(next_event(&mut stream).await.is_some());

    running.stop().await;
}

#[tokio::test]
async fn test_cancelled_stream_stops_receiving() {
    let running = Running::start(2, |_, _| {}).await;
    let mut stream = running.service.event_stream(&[EventTopic::Block, EventTopic::Head]);
    let mut other = running.service.event_stream(&[EventTopic::Block]);
    assert_eq!(running.service.subscriber_count(), 2);

    assert!(running.service.cancel_stream(stream.handle()));
    assert_eq!(running.service.subscriber_count(), 1);

    running.nodes[0].emit(EventTopic::Block, &block_event(11));
    assert!(stream.next().await.is_none());
    assert!(next_event(&mut other).await.is_some());

    drop(other);
    assert_eq!(running.service.subscriber_count(), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_stalled_stream_is_closed_when_its_buffer_fills() {
    let running = Running::start(1, |_, _| {}).await;
    let mut stalled = running.service.event_stream_with_capacity(&[EventTopic::Block], 2);
    let mut reader = running.service.event_stream(&[EventTopic::Block]);

    for slot in 20..23 {
        running.nodes[0].emit(EventTopic::Block, &block_event(slot));
    }
    for _ in 0..3 {
        assert!(next_event(&mut reader).await.is_some());
    }

    let kept: Vec<ForwardedEvent> =
        tokio::time::timeout(WAIT, (&mut stalled).collect()).await.unwrap();
    let kept: Vec<&str> = kept.iter().map(|event| &*event.data).collect();
    assert_eq!(kept, vec![block_event(20).as_str(), block_event(21).as_str()]);

    // The other reader is unaffected.
    running.nodes[0].emit(EventTopic::Block, &block_event(23));
    assert!(next_event(&mut reader).await.is_some());

    drop(stalled);
    assert_eq!(running.service.subscriber_count(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_callback_subscribers() {
    let running = Running::start(1, |_, _| {}).await;
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = running.service.subscribe(
        &[EventTopic::Block],
        Arc::new(move |event: ForwardedEvent| sink.lock().push(event.data.to_string())),
    );

    running.nodes[0].emit(EventTopic::Block, &block_event(12));
    assert!(wait_for(WAIT, || seen.lock().len() == 1).await);

    assert!(running.service.unsubscribe(id));
    assert!(!running.service.unsubscribe(id));
    running.nodes[0].emit(EventTopic::Block, &block_event(13));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().len(), 1);

    running.stop().await;
}
