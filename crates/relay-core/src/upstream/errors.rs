use thiserror::Error;

/// Errors that can occur when talking to an upstream beacon node.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Non-2xx HTTP status.
    ///
    /// First field is the HTTP status code, second is the response body.
    #[error("HTTP error {0}: {1}")]
    Http(u16, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response from upstream was not what the endpoint promises.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Event stream broke mid-flight.
    #[error("Stream error: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// HTTP status of the upstream answer, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(status, _) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for 4xx answers, which blame the request rather than the node.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|status| (400..500).contains(&status))
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Http(..) => "http",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Decode(_) => "decode",
            Self::Stream(_) => "stream",
        }
    }
}

/// Outcome class of a failed event subscription attempt.
///
/// Each class is retried on its own backoff track.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionFailure {
    /// The node rejected the subscription request (4xx).
    #[error("subscription rejected by node")]
    Client,

    /// The node failed, was unreachable, or the stream ended.
    #[error("subscription failed on node side")]
    Server,
}

impl SubscriptionFailure {
    #[must_use]
    pub fn classify(error: &UpstreamError) -> Self {
        if error.is_client_error() {
            Self::Client
        } else {
            Self::Server
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}
