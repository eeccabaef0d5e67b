//! Mock Infrastructure for Testing the Beacon Relay
//!
//! This module provides reusable mock beacon nodes, so aggregation, connection lifecycle and
//! the HTTP boundary can be tested without real network connections.
//!
//! ## Components
//!
//! - `MockBeaconClient`: in-memory [`BeaconClient`](relay_core::upstream::BeaconClient) with
//!   scriptable health data, canned answers and push-driven event streams
//! - `BeaconNodeMock`: wraps mockito to serve Beacon API responses over real HTTP
//! - Test helpers for common chain fixtures and service setups
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{MockBeaconClient, service_with};
//!
//! let node = MockBeaconClient::new("http://node-a");
//! let service = service_with(&[node.clone()]);
//! refresh_health(&service).await;
//! ```

pub mod beacon_mock;
pub mod mock_client;

pub use beacon_mock::BeaconNodeMock;
pub use mock_client::{MockBeaconClient, MockFailure};
pub use test_helpers::*;
