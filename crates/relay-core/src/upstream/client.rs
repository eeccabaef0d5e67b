use crate::{
    events::EventTopic,
    types::{ApiResponse, Envelope, ForkInfo, GenesisInfo, SyncingStatus},
    upstream::{
        errors::UpstreamError,
        operations::Operation,
        sse::{decode_event_stream, RawEventStream},
    },
};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, ACCEPT, CONTENT_TYPE},
    Client, ClientBuilder, Response,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::BTreeMap, time::Duration};
use url::Url;

/// Request/response and event-stream access to one beacon node.
///
/// Implemented over HTTP by [`HttpBeaconClient`]; tests substitute in-memory mocks.
#[async_trait]
pub trait BeaconClient: Send + Sync {
    /// Base URL of the node, used for logs and metric labels.
    fn endpoint(&self) -> &str;

    /// `GET /eth/v1/node/syncing`
    async fn syncing(&self) -> Result<SyncingStatus, UpstreamError>;

    /// `GET /eth/v1/beacon/states/{state_id}/fork`
    async fn fork(&self, state_id: &str) -> Result<ForkInfo, UpstreamError>;

    /// `GET /eth/v1/beacon/genesis`
    async fn genesis(&self) -> Result<GenesisInfo, UpstreamError>;

    /// Forwards a catalog operation and returns the node's successful answer.
    async fn call(&self, operation: &Operation) -> Result<ApiResponse, UpstreamError>;

    /// Opens the event stream for a single topic.
    async fn subscribe(&self, topic: EventTopic) -> Result<RawEventStream, UpstreamError>;
}

/// Timeouts for [`HttpBeaconClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout for request/response calls, and the time an event stream has to
    /// answer with its response headers.
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(5), request_timeout: Duration::from_secs(10) }
    }
}

/// Maximum number of bytes of an error body kept in [`UpstreamError::Http`].
const MAX_ERROR_BODY: usize = 256;

/// [`BeaconClient`] over reqwest.
pub struct HttpBeaconClient {
    base: Url,
    endpoint: String,
    client: Client,
    config: HttpClientConfig,
}

impl HttpBeaconClient {
    /// Creates a client for the node at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(base: Url, config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(config.connect_timeout)
            .use_rustls_tls()
            .user_agent(concat!("beacon-relay/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::Network(e)
            })?;

        let endpoint = base.as_str().trim_end_matches('/').to_string();
        Ok(Self { base, endpoint, client, config })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.endpoint)
    }

    fn map_send_error(e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Network(e)
        }
    }

    /// Turns a non-2xx response into [`UpstreamError::Http`], keeping a truncated body.
    async fn check_status(response: Response) -> Result<Response, UpstreamError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("... (truncated)");
        }
        Err(UpstreamError::Http(status, text))
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let response = self
            .client
            .get(self.url(path))
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await.map_err(Self::map_send_error)?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data)
    }

    fn eth_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
        headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("eth-"))
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl BeaconClient for HttpBeaconClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn syncing(&self) -> Result<SyncingStatus, UpstreamError> {
        self.get_data("/eth/v1/node/syncing").await
    }

    async fn fork(&self, state_id: &str) -> Result<ForkInfo, UpstreamError> {
        self.get_data(&format!("/eth/v1/beacon/states/{state_id}/fork")).await
    }

    async fn genesis(&self) -> Result<GenesisInfo, UpstreamError> {
        self.get_data("/eth/v1/beacon/genesis").await
    }

    async fn call(&self, operation: &Operation) -> Result<ApiResponse, UpstreamError> {
        let mut request = self
            .client
            .request(operation.method(), self.url(&operation.path_and_query()))
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout);

        for (name, value) in &operation.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &operation.body {
            request = request.header(CONTENT_TYPE, "application/json").body(body.clone());
        }

        let response = request.send().await.map_err(Self::map_send_error)?;
        let response = Self::check_status(response).await?;
        let status = response.status().as_u16();
        let headers = Self::eth_headers(response.headers());
        let bytes = response.bytes().await.map_err(Self::map_send_error)?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        let mut answer = ApiResponse::new(status, body);
        answer.headers = headers;
        Ok(answer)
    }

    async fn subscribe(&self, topic: EventTopic) -> Result<RawEventStream, UpstreamError> {
        // Only the handshake is bounded; the body stays open for as long as the node streams.
        let request = self
            .client
            .get(self.url(&format!("/eth/v1/events?topics={topic}")))
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.config.request_timeout, request)
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(Self::map_send_error)?;
        let response = Self::check_status(response).await?;

        Ok(decode_event_stream(response.bytes_stream()))
    }
}
