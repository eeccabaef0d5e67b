//! Multi-node aggregation.
//!
//! [`AggregationService`] owns one [`NodeConnection`] per configured beacon node and is the
//! only entry point the HTTP boundary talks to:
//!
//! - **Routing**: before every fan-out (and once per second in the background) the trusted
//!   set is recomputed from the connections' health samples. Nodes outside a strict
//!   majority on genesis or fork are excluded; lagging nodes are skipped.
//! - **Fan-out**: a request goes to every trusted node at once. After the first success the
//!   others get a short grace window; the most common answer wins.
//! - **Events**: every connection forwards decoded events to a shared [`EventDistributor`],
//!   which drops excluded sources and duplicates before delivering to subscribers.
//!
//! # Request Flow
//!
//! ```text
//! execute(op)
//!     │
//!     ▼
//! trusted_connections() ── empty ──► NoHealthyConnections
//!     │
//!     ▼
//! race_all(grace window) ──► successes ──► pick_consensus ──► majority answer
//!                          └► failures  ──► first upstream error (if no success)
//! ```

pub mod distributor;
pub mod registry;
pub mod stream;

pub use distributor::{DedupStrategy, EventDistributor, ExclusionSet};
pub use registry::{SubscriberId, SubscriberRegistry};
pub use stream::{EventStream, StreamHandle};

use crate::{
    consensus::{pick_consensus, race_all, select_trusted, RaceError, SelectionOutcome},
    events::EventTopic,
    metrics::MetricsCollector,
    types::{ApiResponse, GenesisInfo},
    upstream::{
        BeaconClient, ConnectionConfig, ConnectionId, EventCallback, HttpBeaconClient,
        HttpClientConfig, NodeConnection, Operation, UpstreamError, HEALTH_MAX_AGE,
    },
};
use futures_util::{future::BoxFuture, FutureExt};
use std::{hash::Hash, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, mpsc::error::TrySendError},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Events an [`EventStream`] may hold before its reader is considered stalled.
pub const EVENT_STREAM_CAPACITY: usize = 1024;

/// Errors returned to callers of the aggregation service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AggregationError {
    /// No node is currently trusted.
    #[error("no healthy beacon node connections available")]
    NoHealthyConnections,

    /// The fan-out finished without a single answer or error to report.
    #[error("no beacon node responded")]
    NoResponses,

    /// Every trusted node failed; this is the first failure in call order.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl AggregationError {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoHealthyConnections => "no_healthy_connections",
            Self::NoResponses => "no_responses",
            Self::Upstream(_) => "upstream",
        }
    }
}

/// Tunables of the [`AggregationService`].
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Time the remaining nodes get after the first success before they are cancelled.
    pub grace_window: Duration,
    /// Interval of the background trusted-set refresh.
    pub tick_interval: Duration,
    pub dedup: DedupStrategy,
    pub connection: ConnectionConfig,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_millis(500),
            tick_interval: Duration::from_secs(1),
            dedup: DedupStrategy::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Fans requests out to a trusted majority of beacon nodes and merges their event streams.
pub struct AggregationService {
    connections: Vec<Arc<NodeConnection>>,
    excluded: ExclusionSet,
    registry: Arc<SubscriberRegistry>,
    distributor: Arc<EventDistributor>,
    config: AggregationConfig,
    metrics: Arc<MetricsCollector>,
}

impl AggregationService {
    /// Creates a service over already constructed clients. Connection ids follow the order of
    /// `clients`.
    #[must_use]
    pub fn new(
        clients: Vec<Arc<dyn BeaconClient>>,
        config: AggregationConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let excluded = ExclusionSet::default();
        let registry = Arc::new(SubscriberRegistry::new());
        let distributor = Arc::new(EventDistributor::new(
            Arc::clone(&excluded),
            config.dedup,
            Arc::clone(&registry),
            Arc::clone(&metrics),
        ));

        let sink = Arc::clone(&distributor);
        let callback: EventCallback = Arc::new(move |event| {
            sink.distribute(event);
        });

        let connections = clients
            .into_iter()
            .enumerate()
            .map(|(id, client)| {
                Arc::new(NodeConnection::new(
                    id,
                    client,
                    config.connection.clone(),
                    Arc::clone(&metrics),
                    Arc::clone(&callback),
                ))
            })
            .collect();

        Self { connections, excluded, registry, distributor, config, metrics }
    }

    /// Creates a service with one [`HttpBeaconClient`] per endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_endpoints(
        endpoints: &[Url],
        http: &HttpClientConfig,
        config: AggregationConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, UpstreamError> {
        let clients = endpoints
            .iter()
            .map(|url| {
                HttpBeaconClient::new(url.clone(), http.clone())
                    .map(|client| Arc::new(client) as Arc<dyn BeaconClient>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(clients, config, metrics))
    }

    #[must_use]
    pub fn connections(&self) -> &[Arc<NodeConnection>] {
        &self.connections
    }

    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    #[must_use]
    pub fn distributor(&self) -> &Arc<EventDistributor> {
        &self.distributor
    }

    /// Returns `true` if the connection is currently excluded from the trusted set.
    #[must_use]
    pub fn is_excluded(&self, id: ConnectionId) -> bool {
        self.excluded.read().contains(&id)
    }

    /// Starts every connection and the periodic trusted-set refresh.
    #[must_use]
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> =
            self.connections.iter().flat_map(|conn| conn.start(shutdown)).collect();

        let service = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        service.trusted_connections();
                        let subscribers = service.registry.subscriber_count();
                        service.metrics.record_event_subscribers(subscribers);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("aggregation service shutting down");
                        break;
                    }
                }
            }
        }));

        handles
    }

    /// Recomputes the trusted set and returns its members.
    ///
    /// Updates the exclusion set as a side effect; see [`select_trusted`].
    pub fn trusted_connections(&self) -> Vec<Arc<NodeConnection>> {
        let candidates: Vec<_> =
            self.connections.iter().filter_map(|conn| conn.snapshot(HEALTH_MAX_AGE)).collect();
        let known: Vec<ConnectionId> = self.connections.iter().map(|conn| conn.id()).collect();

        let (selection, excluded_count) = {
            let mut excluded = self.excluded.write();
            let selection = select_trusted(candidates, &known, &mut excluded);
            (selection, excluded.len())
        };

        match selection.outcome {
            SelectionOutcome::NoGenesisMajority if !selection.newly_excluded.is_empty() => {
                error!(
                    excluded = ?self.endpoints(&selection.newly_excluded),
                    "no strict majority on genesis, excluding all beacon nodes"
                );
            }
            SelectionOutcome::NoForkMajority if !selection.newly_excluded.is_empty() => {
                error!(
                    excluded = ?self.endpoints(&selection.newly_excluded),
                    "no strict majority on fork, excluding all beacon nodes"
                );
            }
            _ if !selection.newly_excluded.is_empty() => {
                error!(
                    excluded = ?self.endpoints(&selection.newly_excluded),
                    "excluding beacon nodes that disagree with the majority"
                );
            }
            _ => {}
        }
        if !selection.readmitted.is_empty() {
            info!(
                readmitted = ?self.endpoints(&selection.readmitted),
                "beacon nodes rejoined the majority"
            );
        }
        if !selection.lagging.is_empty() {
            debug!(
                lagging = ?self.endpoints(&selection.lagging),
                head_slot = ?selection.highest_head_slot,
                "skipping beacon nodes behind the highest head"
            );
        }

        self.metrics.record_trusted_set(selection.trusted.len(), excluded_count);

        selection.trusted.iter().filter_map(|id| self.connections.get(*id).cloned()).collect()
    }

    fn endpoints(&self, ids: &[ConnectionId]) -> Vec<&str> {
        ids.iter().filter_map(|id| self.connections.get(*id)).map(|conn| conn.endpoint()).collect()
    }

    /// Forwards `operation` to every trusted node and returns the majority answer.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::NoHealthyConnections`] if no node is trusted, otherwise the
    /// first upstream error when no node answered successfully.
    pub async fn execute(&self, operation: &Operation) -> Result<ApiResponse, AggregationError> {
        let operation = Arc::new(operation.clone());
        self.fan_out(operation.kind.as_str(), move |client| {
            let operation = Arc::clone(&operation);
            async move { client.call(&operation).await }.boxed()
        })
        .await
    }

    /// Runs `call` against every trusted node and returns the most common successful value.
    ///
    /// `label` names the call in logs and metrics.
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute`].
    pub async fn fan_out<T, F>(&self, label: &'static str, call: F) -> Result<T, AggregationError>
    where
        T: Eq + Hash + Clone + Send + 'static,
        F: Fn(Arc<dyn BeaconClient>) -> BoxFuture<'static, Result<T, UpstreamError>>,
    {
        let trusted = self.trusted_connections();
        if trusted.is_empty() {
            let err = AggregationError::NoHealthyConnections;
            self.metrics.record_fanout_failure(label, err.as_str());
            warn!(operation = label, "no trusted beacon node available");
            return Err(err);
        }

        let calls = trusted
            .iter()
            .map(|conn| {
                let request = call(Arc::clone(conn.client()));
                let metrics = Arc::clone(&self.metrics);
                let endpoint = conn.endpoint().to_string();
                async move {
                    let started = Instant::now();
                    let result = request.await;
                    let latency_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    metrics.record_upstream_call(label, &endpoint, result.is_ok(), latency_ms);
                    result
                }
                .boxed()
            })
            .collect();

        let outcomes = race_all(calls, self.config.grace_window).await;

        let mut values = Vec::with_capacity(outcomes.len());
        let mut first_error: Option<UpstreamError> = None;
        for (conn, outcome) in trusted.iter().zip(outcomes) {
            match outcome {
                Ok(value) => values.push(value),
                Err(RaceError::Call(e)) => {
                    warn!(
                        upstream = %conn.endpoint(),
                        operation = label,
                        error = %e,
                        "upstream call failed"
                    );
                    first_error.get_or_insert(e);
                }
                Err(RaceError::TimeoutAfterOtherResponse) => {
                    debug!(
                        upstream = %conn.endpoint(),
                        operation = label,
                        "upstream call cancelled after grace window"
                    );
                }
                Err(RaceError::Aborted) => {
                    error!(upstream = %conn.endpoint(), operation = label, "upstream call aborted");
                }
            }
        }

        match pick_consensus(&values) {
            Ok((value, count)) => {
                self.metrics.record_consensus(label, count, values.len());
                if count < values.len() {
                    warn!(
                        operation = label,
                        agreeing = count,
                        responses = values.len(),
                        "beacon nodes disagree, answering with the most common response"
                    );
                }
                Ok(value)
            }
            Err(_) => {
                let err = first_error.map_or(AggregationError::NoResponses, AggregationError::from);
                self.metrics.record_fanout_failure(label, err.as_str());
                Err(err)
            }
        }
    }

    /// Genesis of the trusted majority, served from health samples without an upstream call.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::NoHealthyConnections`] if no node is trusted.
    pub fn genesis(&self) -> Result<GenesisInfo, AggregationError> {
        self.trusted_connections()
            .iter()
            .find_map(|conn| conn.chain_status().genesis)
            .ok_or(AggregationError::NoHealthyConnections)
    }

    /// Registers `callback` for `topics` and returns its id.
    pub fn subscribe(&self, topics: &[EventTopic], callback: EventCallback) -> SubscriberId {
        let id = self.registry.subscribe(topics, callback);
        debug!(subscriber = %id, topics = ?topics, "event subscriber added");
        id
    }

    /// Removes a subscriber from every topic. Returns `false` if `id` was unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.registry.unsubscribe(id);
        if removed {
            debug!(subscriber = %id, "event subscriber removed");
        }
        removed
    }

    /// Returns a stream of events for `topics`, buffering up to [`EVENT_STREAM_CAPACITY`].
    #[must_use]
    pub fn event_stream(&self, topics: &[EventTopic]) -> EventStream {
        self.event_stream_with_capacity(topics, EVENT_STREAM_CAPACITY)
    }

    /// Like [`Self::event_stream`] with a custom buffer size.
    ///
    /// A reader that lets the buffer fill up is cut off: the stream yields what was already
    /// buffered and then ends.
    #[must_use]
    pub fn event_stream_with_capacity(
        &self,
        topics: &[EventTopic],
        capacity: usize,
    ) -> EventStream {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sender = parking_lot::Mutex::new(Some(sender));
        let callback: EventCallback = Arc::new(move |event| {
            let mut slot = sender.lock();
            let Some(tx) = slot.as_ref() else {
                return;
            };
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(topic = %event.topic, "event stream reader fell behind, closing it");
                    *slot = None;
                }
                Err(TrySendError::Closed(_)) => *slot = None,
            }
        });
        let id = self.subscribe(topics, callback);
        EventStream::new(id, receiver, Arc::clone(&self.registry))
    }

    /// Ends the stream identified by `handle`. Returns `false` if it was already gone.
    pub fn cancel_stream(&self, handle: StreamHandle) -> bool {
        self.unsubscribe(handle.id())
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }
}

impl std::fmt::Debug for AggregationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field("connections", &self.connections)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
