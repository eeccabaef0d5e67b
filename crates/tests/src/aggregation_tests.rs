//! Integration tests for trusted-set routing and fan-out consensus.
//!
//! These tests drive [`AggregationService`] over in-memory beacon nodes:
//! - Nodes outside a strict genesis or fork majority are excluded
//! - Excluded nodes come back only by rejoining a majority
//! - Lagging and stale nodes are skipped without exclusion
//! - Fan-out answers with the most common response, or the first error

use crate::mock_infrastructure::{
    mainnet_genesis, other_genesis, refresh_health, service_with, MockBeaconClient, MockFailure,
};
use futures_util::FutureExt;
use relay_core::{
    aggregation::{AggregationError, AggregationService},
    types::ApiResponse,
    upstream::{Operation, OperationKind, UpstreamError},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

fn nodes(count: usize) -> Vec<Arc<MockBeaconClient>> {
    (0..count).map(|i| MockBeaconClient::new(&format!("http://node-{i}"))).collect()
}

fn trusted_ids(service: &AggregationService) -> Vec<usize> {
    service.trusted_connections().iter().map(|conn| conn.id()).collect()
}

fn spec_operation() -> Operation {
    Operation::new(OperationKind::GetSpec, &[]).unwrap()
}

fn spec_answer(name: &str) -> ApiResponse {
    ApiResponse::new(200, json!({ "data": { "CONFIG_NAME": name } }))
}

#[tokio::test]
async fn test_genesis_split_three_two_keeps_majority() {
    let nodes = nodes(5);
    nodes[1].set_genesis(other_genesis());
    nodes[3].set_genesis(other_genesis());
    let service = service_with(&nodes);
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![0, 2, 4]);
    assert!(service.is_excluded(1));
    assert!(service.is_excluded(3));
    assert!(!service.is_excluded(0));
}

#[tokio::test]
async fn test_genesis_split_two_two_excludes_everyone() {
    let nodes = nodes(4);
    nodes[1].set_genesis(other_genesis());
    nodes[3].set_genesis(other_genesis());
    let service = service_with(&nodes);
    refresh_health(&service).await;

    assert!(trusted_ids(&service).is_empty());
    for id in 0..4 {
        assert!(service.is_excluded(id), "node {id} should be excluded");
    }

    let err = service.execute(&spec_operation()).await.unwrap_err();
    assert!(matches!(err, AggregationError::NoHealthyConnections));
}

#[tokio::test]
async fn test_excluded_nodes_rejoin_through_majority() {
    let nodes = nodes(4);
    nodes[1].set_genesis(other_genesis());
    nodes[3].set_genesis(other_genesis());
    let service = service_with(&nodes);
    refresh_health(&service).await;
    assert!(trusted_ids(&service).is_empty());

    // Node 1 switches back to mainnet: 3 of 4 now agree.
    nodes[1].set_genesis(mainnet_genesis());
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![0, 1, 2]);
    assert!(!service.is_excluded(0));
    assert!(!service.is_excluded(1));
    assert!(service.is_excluded(3));
}

#[tokio::test]
async fn test_fork_minority_is_excluded() {
    let nodes = nodes(3);
    nodes[2].set_fork_version("0x05000000");
    let service = service_with(&nodes);
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![0, 1]);
    assert!(service.is_excluded(2));
}

#[tokio::test]
async fn test_fork_version_casing_is_not_a_disagreement() {
    let nodes = nodes(3);
    nodes[1].set_fork_version("04000000");
    nodes[2].set_fork_version("0X04000000");
    let service = service_with(&nodes);
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_lagging_node_is_skipped_not_excluded() {
    let nodes = nodes(3);
    nodes[0].set_head_slot(99);
    let service = service_with(&nodes);
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![1, 2]);
    assert!(!service.is_excluded(0));

    nodes[0].set_head_slot(100);
    refresh_health(&service).await;
    assert_eq!(trusted_ids(&service), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_samples_drop_a_majority_member() {
    let nodes = nodes(3);
    let service = service_with(&nodes);
    refresh_health(&service).await;
    assert_eq!(trusted_ids(&service), vec![0, 1, 2]);

    tokio::time::advance(Duration::from_secs(61)).await;
    service.connections()[0].check_health().await;
    service.connections()[1].check_health().await;

    assert_eq!(trusted_ids(&service), vec![0, 1]);
    assert!(!service.is_excluded(2));
}

#[tokio::test]
async fn test_failed_health_check_removes_node() {
    let nodes = nodes(3);
    let service = service_with(&nodes);
    refresh_health(&service).await;

    nodes[1].set_health_failure(Some(MockFailure::Timeout));
    refresh_health(&service).await;

    assert_eq!(trusted_ids(&service), vec![0, 2]);
    assert!(!service.is_excluded(1));
}

#[tokio::test]
async fn test_execute_answers_with_majority() {
    let nodes = nodes(3);
    nodes[0].respond(OperationKind::GetSpec, spec_answer("mainnet"));
    nodes[1].respond(OperationKind::GetSpec, spec_answer("holesky"));
    nodes[2].respond(OperationKind::GetSpec, spec_answer("mainnet"));
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let answer = service.execute(&spec_operation()).await.unwrap();
    assert_eq!(answer, spec_answer("mainnet"));
}

#[tokio::test]
async fn test_execute_tie_prefers_first_answer() {
    let nodes = nodes(2);
    nodes[0].respond(OperationKind::GetSpec, spec_answer("first"));
    nodes[1].respond(OperationKind::GetSpec, spec_answer("second"));
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let answer = service.execute(&spec_operation()).await.unwrap();
    assert_eq!(answer, spec_answer("first"));
}

#[tokio::test]
async fn test_execute_ignores_failures_when_one_node_answers() {
    let nodes = nodes(3);
    nodes[0].fail(OperationKind::GetSpec, MockFailure::Http(500, "internal".to_string()));
    nodes[1].respond(OperationKind::GetSpec, spec_answer("mainnet"));
    nodes[2].fail(OperationKind::GetSpec, MockFailure::Timeout);
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let answer = service.execute(&spec_operation()).await.unwrap();
    assert_eq!(answer, spec_answer("mainnet"));
}

#[tokio::test]
async fn test_execute_returns_first_error_when_all_fail() {
    let nodes = nodes(3);
    nodes[0].fail(OperationKind::GetSpec, MockFailure::Http(503, "syncing".to_string()));
    nodes[1].fail(OperationKind::GetSpec, MockFailure::Timeout);
    nodes[2].fail(OperationKind::GetSpec, MockFailure::Http(500, "internal".to_string()));
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let err = service.execute(&spec_operation()).await.unwrap_err();
    match err {
        AggregationError::Upstream(UpstreamError::Http(status, body)) => {
            assert_eq!(status, 503);
            assert_eq!(body, "syncing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_straggler_is_cut_off_after_grace_window() {
    let nodes = nodes(3);
    for node in &nodes {
        node.respond(OperationKind::GetSpec, spec_answer("mainnet"));
    }
    nodes[2].respond(OperationKind::GetSpec, spec_answer("late"));
    nodes[2].set_call_delay(Duration::from_secs(30));
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let started = Instant::now();
    let answer = service.execute(&spec_operation()).await.unwrap();

    assert_eq!(answer, spec_answer("mainnet"));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_operation_is_forwarded_verbatim() {
    let nodes = nodes(2);
    for node in &nodes {
        node.respond(OperationKind::PublishBlockV2, ApiResponse::new(200, json!(null)));
    }
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let operation = Operation::new(OperationKind::PublishBlockV2, &[])
        .unwrap()
        .with_query("broadcast_validation=gossip")
        .with_header("Eth-Consensus-Version", "deneb")
        .with_body(r#"{"message":{}}"#.as_bytes().to_vec());

    let answer = service.execute(&operation).await.unwrap();
    assert!(answer.is_empty());

    for node in &nodes {
        let received = node.operations();
        assert_eq!(received, vec![operation.clone()]);
    }
}

#[tokio::test]
async fn test_untrusted_nodes_are_not_called() {
    let nodes = nodes(3);
    for node in &nodes {
        node.respond(OperationKind::GetSpec, spec_answer("mainnet"));
    }
    nodes[2].set_genesis(other_genesis());
    let service = service_with(&nodes);
    refresh_health(&service).await;

    service.execute(&spec_operation()).await.unwrap();

    assert_eq!(nodes[0].operations().len(), 1);
    assert_eq!(nodes[1].operations().len(), 1);
    assert!(nodes[2].operations().is_empty());
}

#[tokio::test]
async fn test_genesis_comes_from_trusted_samples() {
    let nodes = nodes(3);
    nodes[2].set_genesis(other_genesis());
    let service = service_with(&nodes);

    assert!(matches!(service.genesis(), Err(AggregationError::NoHealthyConnections)));

    refresh_health(&service).await;
    let genesis = service.genesis().unwrap();
    assert_eq!(genesis, mainnet_genesis());
}

#[tokio::test]
async fn test_fan_out_with_custom_call() {
    let nodes = nodes(3);
    let service = service_with(&nodes);
    refresh_health(&service).await;

    let head = service
        .fan_out("syncing", |client| {
            async move { client.syncing().await.map(|s| s.head_slot) }.boxed()
        })
        .await
        .unwrap();
    assert_eq!(head, "100");
}
