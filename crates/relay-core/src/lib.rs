//! # Relay Core
//!
//! Core library of the beacon relay: a single Beacon API endpoint backed by several redundant
//! beacon nodes.
//!
//! This crate provides the foundational components for:
//!
//! - **[`upstream`]**: per-node HTTP client, operation catalog, server-sent events decoding,
//!   and the [`upstream::NodeConnection`] lifecycle (health sampling, event subscriptions
//!   with exponential backoff).
//!
//! - **[`consensus`]**: racing calls with a grace window, majority picking over equal
//!   responses, and strict-majority trusted-set selection on genesis and fork.
//!
//! - **[`aggregation`]**: the [`aggregation::AggregationService`] that fans requests out to
//!   trusted nodes and merges their event streams into one deduplicated feed.
//!
//! - **[`cache`]**: time-windowed and count-bounded dedup caches.
//!
//! - **[`config`]**: environment-driven configuration with fail-fast validation.
//!
//! - **[`metrics`]**: Prometheus metrics collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      AggregationService                       │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌─────────────┐  │
//! │  │  trusted set     │  │ EventDistributor │  │   Metrics   │  │
//! │  │  (select_trusted)│  │  (dedup cache)   │  │             │  │
//! │  └────────┬─────────┘  └────────▲─────────┘  └─────────────┘  │
//! │           │                     │ ForwardedEvent              │
//! │  ┌────────▼─────────────────────┴─────────┐                   │
//! │  │     NodeConnection × N                 │                   │
//! │  │  health loop · topic drivers · backoff │                   │
//! │  └────────┬───────────────────────────────┘                   │
//! └───────────┼───────────────────────────────────────────────────┘
//!             ▼
//!      HttpBeaconClient ──► beacon node
//! ```

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod events;
pub mod metrics;
pub mod types;
pub mod upstream;
