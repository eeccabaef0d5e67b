//! In-memory beacon node.

use super::test_helpers::{fork_info, mainnet_genesis, syncing_status};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use relay_core::{
    events::EventTopic,
    types::{ApiResponse, ForkInfo, GenesisInfo, SyncingStatus},
    upstream::{
        BeaconClient, Operation, OperationKind, RawEvent, RawEventStream, UpstreamError,
    },
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// Cloneable stand-in for [`UpstreamError`], which is not `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    Http(u16, String),
    InvalidResponse(String),
}

impl From<MockFailure> for UpstreamError {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Timeout => Self::Timeout,
            MockFailure::Http(status, body) => Self::Http(status, body),
            MockFailure::InvalidResponse(msg) => Self::InvalidResponse(msg),
        }
    }
}

type EventSender = mpsc::UnboundedSender<Result<RawEvent, UpstreamError>>;

struct MockState {
    syncing: SyncingStatus,
    fork: ForkInfo,
    genesis: GenesisInfo,
    health_failure: Option<MockFailure>,
    answers: HashMap<OperationKind, Result<ApiResponse, MockFailure>>,
    call_delay: Duration,
    subscribe_failure: Option<MockFailure>,
    subscribe_hangs: bool,
    streams: Vec<(EventTopic, EventSender)>,
    operations: Vec<Operation>,
}

/// Scriptable [`BeaconClient`].
///
/// Starts out as a healthy mainnet node at slot 100 on the `0x04000000` fork. Every setter
/// takes `&self`, so a test can change the node's behavior while a service holds it.
pub struct MockBeaconClient {
    endpoint: String,
    state: Mutex<MockState>,
    health_checks: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl MockBeaconClient {
    #[must_use]
    pub fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            state: Mutex::new(MockState {
                syncing: syncing_status(100),
                fork: fork_info("0x04000000"),
                genesis: mainnet_genesis(),
                health_failure: None,
                answers: HashMap::new(),
                call_delay: Duration::ZERO,
                subscribe_failure: None,
                subscribe_hangs: false,
                streams: Vec::new(),
                operations: Vec::new(),
            }),
            health_checks: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        })
    }

    /// Upcasts for [`relay_core::aggregation::AggregationService::new`].
    #[must_use]
    pub fn as_client(self: &Arc<Self>) -> Arc<dyn BeaconClient> {
        Arc::clone(self) as Arc<dyn BeaconClient>
    }

    pub fn set_head_slot(&self, slot: u64) {
        self.state.lock().syncing = syncing_status(slot);
    }

    pub fn set_fork_version(&self, version: &str) {
        self.state.lock().fork = fork_info(version);
    }

    pub fn set_genesis(&self, genesis: GenesisInfo) {
        self.state.lock().genesis = genesis;
    }

    /// Makes every health call fail with `failure`, or succeed again with `None`.
    pub fn set_health_failure(&self, failure: Option<MockFailure>) {
        self.state.lock().health_failure = failure;
    }

    pub fn respond(&self, kind: OperationKind, answer: ApiResponse) {
        self.state.lock().answers.insert(kind, Ok(answer));
    }

    pub fn fail(&self, kind: OperationKind, failure: MockFailure) {
        self.state.lock().answers.insert(kind, Err(failure));
    }

    /// Delays every `call` by `delay`.
    pub fn set_call_delay(&self, delay: Duration) {
        self.state.lock().call_delay = delay;
    }

    /// Makes `subscribe` fail with `failure`, or succeed again with `None`.
    pub fn set_subscribe_failure(&self, failure: Option<MockFailure>) {
        self.state.lock().subscribe_failure = failure;
    }

    /// Makes `subscribe` never answer, like a node that accepts the connection and goes silent.
    pub fn set_subscribe_hangs(&self, hangs: bool) {
        self.state.lock().subscribe_hangs = hangs;
    }

    /// Pushes one frame to every open stream of `topic`. Returns how many streams got it.
    pub fn emit(&self, topic: EventTopic, data: &str) -> usize {
        let frame = RawEvent {
            event: Some(topic.as_str().to_string()),
            data: Some(data.to_string()),
            id: None,
        };
        let mut state = self.state.lock();
        state.streams.retain(|(_, sender)| !sender.is_closed());
        state
            .streams
            .iter()
            .filter(|(t, _)| *t == topic)
            .filter(|(_, sender)| sender.send(Ok(frame.clone())).is_ok())
            .count()
    }

    /// Ends every open stream as if the node closed the connections.
    pub fn close_streams(&self) {
        self.state.lock().streams.clear();
    }

    /// Number of streams that are still being read.
    #[must_use]
    pub fn open_streams(&self, topic: EventTopic) -> usize {
        self.state
            .lock()
            .streams
            .iter()
            .filter(|(t, sender)| *t == topic && !sender.is_closed())
            .count()
    }

    #[must_use]
    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Operations received through `call`, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    fn health<T>(&self, value: impl FnOnce(&MockState) -> T) -> Result<T, UpstreamError> {
        let state = self.state.lock();
        match &state.health_failure {
            Some(failure) => Err(failure.clone().into()),
            None => Ok(value(&*state)),
        }
    }
}

#[async_trait]
impl BeaconClient for MockBeaconClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn syncing(&self) -> Result<SyncingStatus, UpstreamError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.health(|state| state.syncing.clone())
    }

    async fn fork(&self, _state_id: &str) -> Result<ForkInfo, UpstreamError> {
        self.health(|state| state.fork.clone())
    }

    async fn genesis(&self) -> Result<GenesisInfo, UpstreamError> {
        self.health(|state| state.genesis.clone())
    }

    async fn call(&self, operation: &Operation) -> Result<ApiResponse, UpstreamError> {
        let (delay, answer) = {
            let mut state = self.state.lock();
            state.operations.push(operation.clone());
            let answer = state.answers.get(&operation.kind).cloned();
            (state.call_delay, answer)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match answer {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(failure)) => Err(failure.into()),
            None => Err(UpstreamError::Http(404, format!("no answer for {}", operation.kind))),
        }
    }

    async fn subscribe(&self, topic: EventTopic) -> Result<RawEventStream, UpstreamError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let hangs = self.state.lock().subscribe_hangs;
        if hangs {
            return std::future::pending().await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = &state.subscribe_failure {
            return Err(failure.clone().into());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.streams.push((topic, sender));

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        })
        .boxed())
    }
}

impl std::fmt::Debug for MockBeaconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBeaconClient").field("endpoint", &self.endpoint).finish()
    }
}
