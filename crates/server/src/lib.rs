//! HTTP boundary of the beacon relay.
//!
//! Serves the Beacon API on top of [`relay_core::aggregation::AggregationService`]: every
//! proxied operation is answered by the trusted majority, `/eth/v1/events` streams the merged
//! event feed, and a few operational routes (`/healthz`, `/metrics`, `/robots.txt`) sit next
//! to them.

pub mod error;
pub mod events;
pub mod router;
