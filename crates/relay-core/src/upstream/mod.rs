//! Upstream beacon node access.
//!
//! This module handles everything that talks to a single beacon node:
//! - the [`BeaconClient`] contract and its reqwest implementation
//! - the catalog of proxied Beacon API operations
//! - server-sent events framing for `/eth/v1/events`
//! - per-node health sampling and event subscription lifecycle ([`NodeConnection`])
//! - exponential backoff for resubscription
//!
//! Agreement across nodes lives in [`crate::consensus`] and [`crate::aggregation`].

pub mod backoff;
pub mod client;
pub mod connection;
pub mod errors;
pub mod operations;
pub mod sse;

pub use backoff::BackoffManager;
pub use client::{BeaconClient, HttpBeaconClient, HttpClientConfig};
pub use connection::{
    ChainStatus, ConnectionConfig, ConnectionId, EventCallback, ForwardedEvent, HealthSamples,
    NodeConnection, Sample, SubscriptionState, HEALTH_MAX_AGE,
};
pub use errors::{SubscriptionFailure, UpstreamError};
pub use operations::{Operation, OperationError, OperationKind};
pub use sse::{decode_event_stream, RawEvent, RawEventStream, SseDecoder};
