//! Integration tests for `HttpBeaconClient` against a mockito beacon node.

use crate::mock_infrastructure::{
    block_event, fork_info, mainnet_genesis, syncing_status, BeaconNodeMock,
};
use futures_util::StreamExt;
use mockito::Matcher;
use relay_core::{
    events::EventTopic,
    upstream::{
        BeaconClient, HttpBeaconClient, HttpClientConfig, Operation, OperationKind,
        UpstreamError,
    },
};
use serde_json::json;
use std::time::Duration;
use url::Url;

fn client_for(mock: &BeaconNodeMock) -> HttpBeaconClient {
    HttpBeaconClient::new(mock.url(), HttpClientConfig::default()).unwrap()
}

#[tokio::test]
async fn test_health_endpoints_are_unwrapped() {
    let mut mock = BeaconNodeMock::new().await;
    mock.mock_syncing(&syncing_status(4242))
        .mock_fork(&fork_info("0x04000000"))
        .mock_genesis(&mainnet_genesis());
    let client = client_for(&mock);

    let syncing = client.syncing().await.unwrap();
    assert_eq!(syncing.head_slot_number(), Some(4242));
    assert_eq!(client.fork("head").await.unwrap().fork_id(), "04000000");
    assert_eq!(client.genesis().await.unwrap(), mainnet_genesis());
    assert!(!client.endpoint().ends_with('/'));
}

#[tokio::test]
async fn test_call_forwards_query_headers_and_body() {
    let mut mock = BeaconNodeMock::new().await;
    let expected = mock
        .server_mut()
        .mock("POST", "/eth/v2/beacon/blocks")
        .match_query(Matcher::UrlEncoded(
            "broadcast_validation".to_string(),
            "consensus".to_string(),
        ))
        .match_header("eth-consensus-version", "deneb")
        .match_body(Matcher::Json(json!({"message": {"slot": "1"}})))
        .with_status(202)
        .with_header("eth-consensus-version", "deneb")
        .create_async()
        .await;
    let client = client_for(&mock);

    let operation = Operation::new(OperationKind::PublishBlockV2, &[])
        .unwrap()
        .with_query("broadcast_validation=consensus")
        .with_header("Eth-Consensus-Version", "deneb")
        .with_body(r#"{"message":{"slot":"1"}}"#.as_bytes().to_vec());
    let answer = client.call(&operation).await.unwrap();

    expected.assert_async().await;
    assert_eq!(answer.status, 202);
    assert!(answer.is_empty());
    let version = answer.headers.get("eth-consensus-version").map(String::as_str);
    assert_eq!(version, Some("deneb"));
}

#[tokio::test]
async fn test_call_returns_json_body() {
    let mut mock = BeaconNodeMock::new().await;
    let body = json!({
        "data": { "chain_id": "1", "address": "0x00000000219ab540356cbb839cbe05303d7705fa" }
    });
    mock.mock_route("GET", "/eth/v1/config/deposit_contract", 200, &body.to_string(), &[]);
    let client = client_for(&mock);

    let operation = Operation::new(OperationKind::GetDepositContract, &[]).unwrap();
    let answer = client.call(&operation).await.unwrap();

    assert_eq!(answer.status, 200);
    assert_eq!(answer.body.as_value(), &body);
}

#[tokio::test]
async fn test_error_status_keeps_truncated_body() {
    let mut mock = BeaconNodeMock::new().await;
    let long = "x".repeat(2000);
    mock.mock_route("GET", "/eth/v1/beacon/states/finalized/fork", 404, &long, &[]);
    let client = client_for(&mock);

    let operation = Operation::new(OperationKind::GetStateFork, &["finalized"]).unwrap();
    let err = client.call(&operation).await.unwrap_err();

    assert!(err.is_client_error());
    match err {
        UpstreamError::Http(status, body) => {
            assert_eq!(status, 404);
            assert!(body.len() < 300);
            assert!(body.ends_with("(truncated)"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_json_is_a_decode_error() {
    let mut mock = BeaconNodeMock::new().await;
    mock.mock_route("GET", "/eth/v1/node/version", 200, "{not json", &[]);
    let client = client_for(&mock);

    let operation = Operation::new(OperationKind::GetNodeVersion, &[]).unwrap();
    let err = client.call(&operation).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Decode(_)));
}

#[tokio::test]
async fn test_unreachable_node_is_a_network_error() {
    let config = HttpClientConfig {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(1),
    };
    let endpoint = Url::parse("http://127.0.0.1:1").unwrap();
    let client = HttpBeaconClient::new(endpoint, config).unwrap();

    let err = client.syncing().await.unwrap_err();
    assert!(matches!(err, UpstreamError::Network(_) | UpstreamError::Timeout));
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn test_subscribe_decodes_event_stream() {
    let mut mock = BeaconNodeMock::new().await;
    let body = format!(
        ": keep-alive\r\n\r\nevent: block\r\ndata: {}\r\n\r\nevent: block\ndata: {}\n\n",
        block_event(1),
        block_event(2)
    );
    mock.mock_events(EventTopic::Block, &body);
    let client = client_for(&mock);

    let stream = client.subscribe(EventTopic::Block).await.unwrap();
    let frames: Vec<_> = stream.collect().await;

    assert_eq!(frames.len(), 2);
    let first = frames[0].as_ref().unwrap();
    assert_eq!(first.event.as_deref(), Some("block"));
    assert_eq!(first.data.as_deref(), Some(block_event(1).as_str()));
    let second = frames[1].as_ref().unwrap();
    assert_eq!(second.data.as_deref(), Some(block_event(2).as_str()));
}

#[tokio::test]
async fn test_rejected_subscription() {
    let mut mock = BeaconNodeMock::new().await;
    let _rejected = mock
        .server_mut()
        .mock("GET", "/eth/v1/events")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":400,"message":"Invalid topic"}"#)
        .create_async()
        .await;
    let client = client_for(&mock);

    let err = client.subscribe(EventTopic::LightClientFinalityUpdate).await.err().unwrap();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_subscribe_to_silent_node_times_out() {
    // Accepts connections and never writes a response.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = HttpClientConfig {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(300),
    };
    let client = HttpBeaconClient::new(Url::parse(&format!("http://{addr}")).unwrap(), config)
        .unwrap();

    let attempt = tokio::time::timeout(Duration::from_secs(5), client.subscribe(EventTopic::Head))
        .await
        .expect("subscribe resolves on its own");
    let err = attempt.err().unwrap();
    assert!(matches!(err, UpstreamError::Timeout));
    assert!(!err.is_client_error());

    silent.abort();
}
