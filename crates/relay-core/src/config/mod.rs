//! Application configuration loaded from the environment.
//!
//! # Configuration Hierarchy
//!
//! 1. **Compiled defaults**: set on the `config` builder
//! 2. **Environment variables**: override any default (`HTTP_PORT=9000`)
//!
//! # Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BEACON_NODE_ENDPOINTS` | required | Comma separated beacon node base URLs |
//! | `HTTP_HOST` | `0.0.0.0` | Listen address |
//! | `HTTP_PORT` | `8080` | Listen port |
//! | `LOG_FORMAT` | `pretty` | `pretty` or `json` |
//! | `GRACE_WINDOW_MS` | `500` | Extra time for corroborating answers after the first success |
//! | `HEALTH_INTERVAL_SECONDS` | `12` | Per-node health sampling interval |
//! | `UPSTREAM_TIMEOUT_SECONDS` | `10` | Request timeout for upstream calls |
//! | `EVENT_TOPICS` | see [`EventTopic::DEFAULT_SUBSCRIBED`] | Topics subscribed on every node |
//! | `EVENT_DEDUP_MODE` | `windowed` | `windowed` or `bounded` |
//! | `EVENT_DEDUP_WINDOW_SECONDS` | `600` | Window of the time-based dedup cache |
//! | `EVENT_DEDUP_CAPACITY` | `100000` | Entry limit of the count-bounded dedup cache |
//!
//! # Validation
//!
//! Loading fails fast: an absent or empty endpoint list, a malformed URL, or a zero interval
//! is an error, not a silent fallback.

use crate::{
    aggregation::{AggregationConfig, DedupStrategy},
    events::{EventTopic, UnknownTopic},
    upstream::{ConnectionConfig, HttpClientConfig},
};
use config::{Config, Environment};
use serde::Deserialize;
use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};
use thiserror::Error;
use url::Url;

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// `BEACON_NODE_ENDPOINTS` is unset or lists no URL.
    #[error("BEACON_NODE_ENDPOINTS must list at least one beacon node URL")]
    MissingEndpoints,

    /// The list names some endpoints but one of its entries is blank, e.g. `a,,b`.
    #[error("BEACON_NODE_ENDPOINTS entry {0} is empty")]
    EmptyEndpoint(usize),

    #[error("invalid beacon node URL {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    /// URL parsed but is not `http` or `https`.
    #[error("unsupported scheme in beacon node URL {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid listen address {0}")]
    InvalidListenAddress(String),

    #[error("LOG_FORMAT must be \"pretty\" or \"json\", got {0:?}")]
    InvalidLogFormat(String),

    #[error("EVENT_DEDUP_MODE must be \"windowed\" or \"bounded\", got {0:?}")]
    InvalidDedupMode(String),

    #[error(transparent)]
    InvalidTopic(#[from] UnknownTopic),

    /// A duration or capacity that must be positive was zero.
    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    /// The `config` crate failed to read or deserialize the sources.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Raw settings as they come out of the environment, before validation.
#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    #[serde(default)]
    beacon_node_endpoints: Option<String>,
    #[serde(default = "default_http_host")]
    http_host: String,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_log_format")]
    log_format: String,
    #[serde(default = "default_grace_window_ms")]
    grace_window_ms: u64,
    #[serde(default = "default_health_interval_seconds")]
    health_interval_seconds: u64,
    #[serde(default = "default_upstream_timeout_seconds")]
    upstream_timeout_seconds: u64,
    #[serde(default)]
    event_topics: Option<String>,
    #[serde(default = "default_event_dedup_mode")]
    event_dedup_mode: String,
    #[serde(default = "default_event_dedup_window_seconds")]
    event_dedup_window_seconds: u64,
    #[serde(default = "default_event_dedup_capacity")]
    event_dedup_capacity: usize,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_grace_window_ms() -> u64 {
    500
}

fn default_health_interval_seconds() -> u64 {
    12
}

fn default_upstream_timeout_seconds() -> u64 {
    10
}

fn default_event_dedup_mode() -> String {
    "windowed".to_string()
}

fn default_event_dedup_window_seconds() -> u64 {
    600
}

fn default_event_dedup_capacity() -> usize {
    100_000
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoints: Vec<Url>,
    pub listen_addr: SocketAddr,
    pub log_format: LogFormat,
    pub grace_window: Duration,
    pub health_interval: Duration,
    pub upstream_timeout: Duration,
    pub topics: Vec<EventTopic>,
    pub dedup: DedupStrategy,
}

impl AppConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Loads the configuration from an explicit environment source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or fails validation.
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let raw: RawSettings = Config::builder()
            .set_default("http_host", default_http_host())?
            .set_default("http_port", i64::from(default_http_port()))?
            .set_default("log_format", default_log_format())?
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let endpoints = parse_endpoints(raw.beacon_node_endpoints.as_deref().unwrap_or(""))?;

        let listen_addr = format!("{}:{}", raw.http_host.trim(), raw.http_port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidListenAddress(format!("{}:{}", raw.http_host, raw.http_port))
            })?;

        let log_format = match raw.log_format.trim().to_ascii_lowercase().as_str() {
            "pretty" | "" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::InvalidLogFormat(raw.log_format)),
        };

        if raw.grace_window_ms == 0 {
            return Err(ConfigError::Zero("GRACE_WINDOW_MS"));
        }
        if raw.health_interval_seconds == 0 {
            return Err(ConfigError::Zero("HEALTH_INTERVAL_SECONDS"));
        }
        if raw.upstream_timeout_seconds == 0 {
            return Err(ConfigError::Zero("UPSTREAM_TIMEOUT_SECONDS"));
        }

        let topics = match raw.event_topics.as_deref().map(str::trim) {
            None | Some("") => EventTopic::DEFAULT_SUBSCRIBED.to_vec(),
            Some(list) => EventTopic::parse_list(list)?,
        };

        let dedup = match raw.event_dedup_mode.trim().to_ascii_lowercase().as_str() {
            "windowed" => {
                if raw.event_dedup_window_seconds == 0 {
                    return Err(ConfigError::Zero("EVENT_DEDUP_WINDOW_SECONDS"));
                }
                DedupStrategy::Windowed(Duration::from_secs(raw.event_dedup_window_seconds))
            }
            "bounded" => {
                let capacity = NonZeroUsize::new(raw.event_dedup_capacity)
                    .ok_or(ConfigError::Zero("EVENT_DEDUP_CAPACITY"))?;
                DedupStrategy::Bounded(capacity)
            }
            _ => return Err(ConfigError::InvalidDedupMode(raw.event_dedup_mode)),
        };

        Ok(Self {
            endpoints,
            listen_addr,
            log_format,
            grace_window: Duration::from_millis(raw.grace_window_ms),
            health_interval: Duration::from_secs(raw.health_interval_seconds),
            upstream_timeout: Duration::from_secs(raw.upstream_timeout_seconds),
            topics,
            dedup,
        })
    }

    /// Settings for the upstream HTTP clients.
    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig { request_timeout: self.upstream_timeout, ..HttpClientConfig::default() }
    }

    /// Settings for the aggregation service and the connections it owns.
    #[must_use]
    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            grace_window: self.grace_window,
            dedup: self.dedup,
            connection: ConnectionConfig {
                health_interval: self.health_interval,
                topics: self.topics.clone(),
                ..ConnectionConfig::default()
            },
            ..AggregationConfig::default()
        }
    }
}

/// Splits a comma separated endpoint list and validates every URL.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEndpoints`] for an empty list, [`ConfigError::EmptyEndpoint`]
/// for a blank entry and [`ConfigError::InvalidEndpoint`] or [`ConfigError::UnsupportedScheme`]
/// for a bad URL.
pub fn parse_endpoints(raw: &str) -> Result<Vec<Url>, ConfigError> {
    let entries: Vec<&str> = raw.split(',').map(str::trim).collect();
    if entries.iter().all(|entry| entry.is_empty()) {
        return Err(ConfigError::MissingEndpoints);
    }

    let mut endpoints = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.is_empty() {
            return Err(ConfigError::EmptyEndpoint(index));
        }
        let url = Url::parse(entry).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: entry.to_string(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(entry.to_string()));
        }
        endpoints.push(url);
    }
    Ok(endpoints)
}
