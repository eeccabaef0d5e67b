//! Lifecycle of one upstream beacon node.
//!
//! A [`NodeConnection`] owns two kinds of background work:
//!
//! - a health loop sampling `syncing`, `fork(head)` and `genesis` at a fixed interval, and
//! - one driver task per allowed event topic, which subscribes, consumes the stream and
//!   resubscribes with per-class exponential backoff whenever the stream fails or ends.
//!
//! Decoded events are handed to an [`EventCallback`] supplied at construction. The
//! connection never holds a reference to the service that owns it.

use super::{
    backoff::BackoffManager,
    client::BeaconClient,
    errors::{SubscriptionFailure, UpstreamError},
    sse::{RawEvent, RawEventStream},
};
use crate::{
    consensus::trusted::NodeSnapshot,
    events::{BeaconEvent, EventTopic},
    metrics::{EventOutcome, MetricsCollector},
    types::{ForkInfo, GenesisInfo, SyncingStatus},
};
use arc_swap::ArcSwap;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// Index of a connection inside its service, stable for the process lifetime.
pub type ConnectionId = usize;

/// Maximum sample age for a connection to count as healthy when routing and forwarding.
pub const HEALTH_MAX_AGE: Duration = Duration::from_secs(60);

const HEALTH_FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(60);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(20);

/// An event decoded from one connection, on its way to the distributor.
#[derive(Debug, Clone)]
pub struct ForwardedEvent {
    pub connection: ConnectionId,
    pub topic: EventTopic,
    /// Payload exactly as the node sent it.
    pub data: Arc<str>,
    pub event: Arc<BeaconEvent>,
}

/// Receives every event a healthy connection decodes.
pub type EventCallback = Arc<dyn Fn(ForwardedEvent) + Send + Sync>;

/// Tunables of a [`NodeConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub health_interval: Duration,
    /// Topics this connection subscribes to, in startup order.
    pub topics: Vec<EventTopic>,
    pub client_backoff_start: Duration,
    pub client_backoff_max: Duration,
    pub server_backoff_start: Duration,
    pub server_backoff_max: Duration,
    pub backoff_factor: f64,
    /// Upper bound on one subscribe attempt, until the node answers with a stream.
    pub subscribe_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(12),
            topics: EventTopic::DEFAULT_SUBSCRIBED.to_vec(),
            client_backoff_start: Duration::from_secs(5),
            client_backoff_max: Duration::from_secs(300),
            server_backoff_start: Duration::from_secs(5),
            server_backoff_max: Duration::from_secs(60),
            backoff_factor: 1.5,
            subscribe_timeout: Duration::from_secs(60),
        }
    }
}

/// A value together with the time it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample<T> {
    pub value: T,
    pub at: Instant,
}

impl<T> Sample<T> {
    fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.at) <= max_age
    }
}

/// Latest health samples. Replaced as a whole, so readers never see a mix of two checks.
#[derive(Debug, Clone, Default)]
pub struct HealthSamples {
    pub syncing: Option<Sample<SyncingStatus>>,
    pub fork: Option<Sample<ForkInfo>>,
    pub genesis: Option<Sample<GenesisInfo>>,
}

/// Chain view reported by a node, without timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStatus {
    pub syncing: Option<SyncingStatus>,
    pub fork: Option<ForkInfo>,
    pub genesis: Option<GenesisInfo>,
}

/// Per-topic subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Subscribed,
    Failed(SubscriptionFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StatusLine {
    subscribed: Vec<EventTopic>,
    failed: Vec<(EventTopic, SubscriptionFailure)>,
}

#[derive(Debug, Default)]
struct StatusLog {
    last: StatusLine,
    at: Option<Instant>,
}

/// One upstream beacon node with its health samples and event subscriptions.
pub struct NodeConnection {
    id: ConnectionId,
    client: Arc<dyn BeaconClient>,
    config: ConnectionConfig,
    samples: ArcSwap<HealthSamples>,
    subscriptions: Mutex<HashMap<EventTopic, SubscriptionState>>,
    client_backoff: BackoffManager<EventTopic>,
    server_backoff: BackoffManager<EventTopic>,
    callback: EventCallback,
    metrics: Arc<MetricsCollector>,
    startup_complete: AtomicBool,
    status_log: Mutex<StatusLog>,
    last_health_failure_log: Mutex<Option<Instant>>,
}

impl NodeConnection {
    #[must_use]
    pub fn new(
        id: ConnectionId,
        client: Arc<dyn BeaconClient>,
        config: ConnectionConfig,
        metrics: Arc<MetricsCollector>,
        callback: EventCallback,
    ) -> Self {
        let subscriptions =
            config.topics.iter().map(|topic| (*topic, SubscriptionState::Idle)).collect();
        let client_backoff = BackoffManager::new(
            config.client_backoff_start,
            config.client_backoff_max,
            config.backoff_factor,
        );
        let server_backoff = BackoffManager::new(
            config.server_backoff_start,
            config.server_backoff_max,
            config.backoff_factor,
        );

        Self {
            id,
            client,
            config,
            samples: ArcSwap::from_pointee(HealthSamples::default()),
            subscriptions: Mutex::new(subscriptions),
            client_backoff,
            server_backoff,
            callback,
            metrics,
            startup_complete: AtomicBool::new(false),
            status_log: Mutex::new(StatusLog::default()),
            last_health_failure_log: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn BeaconClient> {
        &self.client
    }

    #[must_use]
    pub fn topics(&self) -> &[EventTopic] {
        &self.config.topics
    }

    /// Starts the health loop and the subscription drivers.
    ///
    /// Topics are subscribed one at a time: the driver for the next topic starts only after
    /// the previous topic's first attempt resolved. All tasks stop when `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let health = self.start_health_loop(shutdown.subscribe());
        let startup = self.start_subscriptions(shutdown);
        vec![health, startup]
    }

    fn start_health_loop(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.health_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tokio::select! {
                            () = this.check_health() => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!(upstream = %this.endpoint(), "health loop shutting down");
        })
    }

    fn start_subscriptions(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let shutdown = shutdown.clone();
        let mut shutdown_rx = shutdown.subscribe();

        tokio::spawn(async move {
            for topic in this.config.topics.clone() {
                let (first_attempt_tx, first_attempt_rx) = oneshot::channel();
                let driver = Arc::clone(&this);
                let driver_shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    driver.drive_topic(topic, Some(first_attempt_tx), driver_shutdown).await;
                });

                tokio::select! {
                    _ = first_attempt_rx => {}
                    _ = shutdown_rx.recv() => return,
                }
            }

            this.startup_complete.store(true, Ordering::Release);
            this.log_subscription_status();
        })
    }

    /// Runs one health check and publishes its result.
    ///
    /// On success all three samples are replaced with one timestamp; on any failure all three
    /// are cleared.
    pub async fn check_health(&self) {
        let started = Instant::now();
        let result = tokio::try_join!(
            self.client.syncing(),
            self.client.fork("head"),
            self.client.genesis(),
        );

        match result {
            Ok((syncing, fork, genesis)) => {
                self.samples.store(Arc::new(HealthSamples {
                    syncing: Some(Sample { value: syncing, at: started }),
                    fork: Some(Sample { value: fork, at: started }),
                    genesis: Some(Sample { value: genesis, at: started }),
                }));
                self.metrics.record_upstream_health(self.endpoint(), true);
            }
            Err(e) => {
                self.samples.store(Arc::new(HealthSamples::default()));
                self.metrics.record_upstream_health(self.endpoint(), false);
                self.metrics.record_health_check_failure(self.endpoint(), e.as_str());
                self.log_health_failure(&e);
            }
        }
    }

    fn log_health_failure(&self, e: &UpstreamError) {
        let now = Instant::now();
        let mut last = self.last_health_failure_log.lock();
        if last.is_some_and(|at| now.saturating_duration_since(at) < HEALTH_FAILURE_LOG_INTERVAL) {
            return;
        }
        *last = Some(now);
        error!(upstream = %self.endpoint(), error = %e, "health check failed for beacon node");
    }

    /// Returns `true` if all three health samples exist and none is older than `max_age`.
    #[must_use]
    pub fn is_healthy(&self, max_age: Duration) -> bool {
        let samples = self.samples.load();
        let now = Instant::now();

        match (&samples.syncing, &samples.fork, &samples.genesis) {
            (Some(syncing), Some(fork), Some(genesis)) => {
                syncing.is_fresh(now, max_age) &&
                    fork.is_fresh(now, max_age) &&
                    genesis.is_fresh(now, max_age)
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn chain_status(&self) -> ChainStatus {
        let samples = self.samples.load();
        ChainStatus {
            syncing: samples.syncing.as_ref().map(|s| s.value.clone()),
            fork: samples.fork.as_ref().map(|s| s.value.clone()),
            genesis: samples.genesis.as_ref().map(|s| s.value.clone()),
        }
    }

    /// Current samples, timestamps included.
    #[must_use]
    pub fn health_samples(&self) -> Arc<HealthSamples> {
        self.samples.load_full()
    }

    /// Replaces all health samples at once.
    pub fn store_health_samples(&self, samples: HealthSamples) {
        self.samples.store(Arc::new(samples));
    }

    /// Snapshot for trusted-set selection, if the node is healthy within `max_age` and reports
    /// a parseable head slot.
    #[must_use]
    pub fn snapshot(&self, max_age: Duration) -> Option<NodeSnapshot<ConnectionId>> {
        if !self.is_healthy(max_age) {
            return None;
        }
        let samples = self.samples.load();
        let head_slot = samples.syncing.as_ref()?.value.head_slot_number()?;

        Some(NodeSnapshot {
            id: self.id,
            genesis: samples.genesis.as_ref()?.value.clone(),
            fork_id: samples.fork.as_ref()?.value.fork_id(),
            head_slot,
        })
    }

    #[must_use]
    pub fn subscription_state(&self, topic: EventTopic) -> SubscriptionState {
        self.subscriptions.lock().get(&topic).copied().unwrap_or(SubscriptionState::Idle)
    }

    /// Topics currently holding an open stream, in configured order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<EventTopic> {
        let states = self.subscriptions.lock();
        self.config
            .topics
            .iter()
            .copied()
            .filter(|topic| states.get(topic) == Some(&SubscriptionState::Subscribed))
            .collect()
    }

    fn set_state(&self, topic: EventTopic, state: SubscriptionState) {
        self.subscriptions.lock().insert(topic, state);
    }

    /// Owns every subscription attempt for `topic` until shutdown.
    async fn drive_topic(
        self: Arc<Self>,
        topic: EventTopic,
        mut first_attempt: Option<oneshot::Sender<()>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            self.set_state(topic, SubscriptionState::Subscribing);

            let subscribe = tokio::time::timeout(
                self.config.subscribe_timeout,
                self.client.subscribe(topic),
            );
            let attempt = tokio::select! {
                result = subscribe => result.unwrap_or_else(|_| Err(UpstreamError::Timeout)),
                _ = shutdown_rx.recv() => break,
            };

            let failure = match attempt {
                Ok(stream) => {
                    self.on_subscribed(topic);
                    if let Some(tx) = first_attempt.take() {
                        let _ = tx.send(());
                    }

                    let result = tokio::select! {
                        result = self.consume(topic, stream) => result,
                        _ = shutdown_rx.recv() => break,
                    };
                    match result {
                        Ok(()) => error!(
                            upstream = %self.endpoint(),
                            topic = %topic,
                            "beacon node event stream ended"
                        ),
                        Err(e) => error!(
                            upstream = %self.endpoint(),
                            topic = %topic,
                            error = %e,
                            "beacon node event stream terminated with an error"
                        ),
                    }
                    SubscriptionFailure::Server
                }
                Err(e) => {
                    error!(
                        upstream = %self.endpoint(),
                        topic = %topic,
                        error = %e,
                        "beacon node event stream could not connect"
                    );
                    SubscriptionFailure::classify(&e)
                }
            };

            let delay = self.on_failed(topic, failure);
            if let Some(tx) = first_attempt.take() {
                let _ = tx.send(());
            }
            info!(
                upstream = %self.endpoint(),
                topic = %topic,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling event subscription retry"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.set_state(topic, SubscriptionState::Idle);
        self.metrics.record_subscription(self.endpoint(), topic, false);
        debug!(upstream = %self.endpoint(), topic = %topic, "subscription driver shutting down");
    }

    fn on_subscribed(&self, topic: EventTopic) {
        self.set_state(topic, SubscriptionState::Subscribed);
        self.client_backoff.reset(&topic);
        self.server_backoff.reset(&topic);
        self.metrics.record_subscription(self.endpoint(), topic, true);
        self.log_subscription_status();
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    fn on_failed(&self, topic: EventTopic, failure: SubscriptionFailure) -> Duration {
        self.set_state(topic, SubscriptionState::Failed(failure));
        self.metrics.record_subscription(self.endpoint(), topic, false);
        self.metrics.record_subscription_failure(self.endpoint(), topic, failure);
        self.log_subscription_status();

        match failure {
            SubscriptionFailure::Client => self.client_backoff.backoff(topic),
            SubscriptionFailure::Server => self.server_backoff.backoff(topic),
        }
    }

    async fn consume(
        &self,
        topic: EventTopic,
        mut stream: RawEventStream,
    ) -> Result<(), UpstreamError> {
        while let Some(frame) = stream.next().await {
            self.handle_event(frame?).await;
        }
        debug!(upstream = %self.endpoint(), topic = %topic, "event stream closed by node");
        Ok(())
    }

    /// Decodes one frame and forwards it if this connection is healthy.
    ///
    /// A head event first refreshes the syncing sample so routing sees the new head before
    /// subscribers do.
    pub async fn handle_event(&self, frame: RawEvent) {
        let Some(name) = frame.event else {
            debug!(upstream = %self.endpoint(), "received event without a name");
            return;
        };
        let Ok(topic) = name.parse::<EventTopic>() else {
            warn!(upstream = %self.endpoint(), event = %name, "skipping unknown event type");
            return;
        };
        let Some(data) = frame.data else {
            debug!(upstream = %self.endpoint(), topic = %topic, "received event without data");
            self.metrics.record_event(topic, EventOutcome::Dropped);
            return;
        };
        let event = match BeaconEvent::decode(topic, &data) {
            Ok(event) => event,
            Err(e) => {
                warn!(upstream = %self.endpoint(), error = %e, "could not decode event data");
                self.metrics.record_event(topic, EventOutcome::Dropped);
                return;
            }
        };

        if topic == EventTopic::Head {
            self.refresh_syncing().await;
        }

        if !self.is_healthy(HEALTH_MAX_AGE) {
            debug!(
                upstream = %self.endpoint(),
                topic = %topic,
                "dropping event from unhealthy node"
            );
            return;
        }

        (self.callback)(ForwardedEvent {
            connection: self.id,
            topic,
            data: Arc::from(data),
            event: Arc::new(event),
        });
    }

    /// Replaces only the syncing sample, with a new timestamp.
    async fn refresh_syncing(&self) {
        match self.client.syncing().await {
            Ok(syncing) => {
                let at = Instant::now();
                self.samples.rcu(|current| HealthSamples {
                    syncing: Some(Sample { value: syncing.clone(), at }),
                    ..HealthSamples::clone(current)
                });
            }
            Err(e) => {
                error!(
                    upstream = %self.endpoint(),
                    error = %e,
                    "could not fetch syncing status after head event"
                );
            }
        }
    }

    /// Logs the consolidated subscription status: immediately when it changed, otherwise at
    /// most once per [`STATUS_LOG_INTERVAL`]. Silent until the startup pass finished.
    fn log_subscription_status(&self) {
        if !self.startup_complete.load(Ordering::Acquire) {
            return;
        }

        let line = {
            let states = self.subscriptions.lock();
            let mut line = StatusLine::default();
            for topic in &self.config.topics {
                match states.get(topic) {
                    Some(SubscriptionState::Subscribed) => line.subscribed.push(*topic),
                    Some(SubscriptionState::Failed(failure)) => {
                        line.failed.push((*topic, *failure));
                    }
                    _ => {}
                }
            }
            line
        };

        let now = Instant::now();
        {
            let mut log = self.status_log.lock();
            let recent =
                log.at.is_some_and(|at| now.saturating_duration_since(at) < STATUS_LOG_INTERVAL);
            if log.last == line && recent {
                return;
            }
            log.at = Some(now);
            log.last = line.clone();
        }

        let subscribed: Vec<&str> = line.subscribed.iter().map(EventTopic::as_str).collect();
        info!(
            upstream = %self.endpoint(),
            topics = ?subscribed,
            "beacon node subscribed to events"
        );

        if !line.failed.is_empty() {
            let failed: Vec<String> = line
                .failed
                .iter()
                .map(|(topic, failure)| format!("{topic} ({} error)", failure.as_str()))
                .collect();
            warn!(
                upstream = %self.endpoint(),
                topics = ?failed,
                "beacon node subscription failed"
            );
        }
    }
}

impl std::fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint())
            .field("topics", &self.config.topics)
            .finish_non_exhaustive()
    }
}
