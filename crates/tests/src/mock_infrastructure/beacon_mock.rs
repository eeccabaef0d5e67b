//! Beacon Node Mock for HTTP Testing
//!
//! Wraps mockito to serve Beacon API responses for the routes the relay calls.

use mockito::{Matcher, Mock, Server, ServerGuard};
use relay_core::{
    events::EventTopic,
    types::{ForkInfo, GenesisInfo, SyncingStatus},
};
use serde_json::{json, Value};
use url::Url;

/// Builder for mock beacon node endpoints.
///
/// Uses mockito internally but provides Beacon API specific helpers.
pub struct BeaconNodeMock {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl BeaconNodeMock {
    /// Creates a new beacon node mock with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Returns the URL of the mock server.
    #[must_use]
    pub fn url(&self) -> Url {
        Url::parse(&self.server.url()).expect("mockito serves a valid url")
    }

    /// Direct access to the mockito server for one-off expectations.
    pub fn server_mut(&mut self) -> &mut ServerGuard {
        &mut self.server
    }

    fn data_mock(&mut self, path: &str, data: Value) -> &mut Self {
        let mock = self
            .server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": data }).to_string())
            .create();
        self.mocks.push(mock);
        self
    }

    /// Mocks `GET /eth/v1/node/syncing`.
    pub fn mock_syncing(&mut self, syncing: &SyncingStatus) -> &mut Self {
        self.data_mock("/eth/v1/node/syncing", json!(syncing))
    }

    /// Mocks `GET /eth/v1/beacon/states/head/fork`.
    pub fn mock_fork(&mut self, fork: &ForkInfo) -> &mut Self {
        self.data_mock("/eth/v1/beacon/states/head/fork", json!(fork))
    }

    /// Mocks `GET /eth/v1/beacon/genesis`.
    pub fn mock_genesis(&mut self, genesis: &GenesisInfo) -> &mut Self {
        self.data_mock("/eth/v1/beacon/genesis", json!(genesis))
    }

    /// Mocks an arbitrary route. `headers` are added to the response as-is.
    pub fn mock_route(
        &mut self,
        method: &str,
        path: &str,
        status: usize,
        body: &str,
        headers: &[(&str, &str)],
    ) -> &mut Self {
        let mut mock = self
            .server
            .mock(method, path)
            .match_query(Matcher::Any)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body);
        for (name, value) in headers {
            mock = mock.with_header(*name, *value);
        }
        self.mocks.push(mock.create());
        self
    }

    /// Mocks `GET /eth/v1/events?topics={topic}` with a finite event-stream body.
    pub fn mock_events(&mut self, topic: EventTopic, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("GET", "/eth/v1/events")
            .match_query(Matcher::UrlEncoded("topics".to_string(), topic.as_str().to_string()))
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create();
        self.mocks.push(mock);
        self
    }
}
