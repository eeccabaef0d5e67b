//! Integration Tests for the Beacon Relay
//!
//! This crate contains various test modules:
//!
//! - `aggregation_tests`: trusted-set selection through the service, fan-out and consensus
//! - `connection_tests`: `NodeConnection` health sampling and the subscription lifecycle
//! - `event_stream_tests`: merged, deduplicated event feeds and unsubscription
//! - `http_client_tests`: `HttpBeaconClient` against a mockito beacon node
//! - `http_boundary_tests`: the axum router over mock nodes
//! - `mock_infrastructure`: reusable mock beacon nodes and fixtures
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod aggregation_tests;


#[cfg(test)]
mod event_stream_tests;

#[cfg(test)]
mod http_client_tests;


/// Mock infrastructure for testing
pub mod mock_infrastructure;
