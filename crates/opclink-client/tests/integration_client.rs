// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Client integration tests
//!
//! End-to-end scenarios against the in-process mock server:
//!
//! - `test_browse_*`: address space browsing from the root folder
//! - `test_read_*` / `test_write_*`: attribute IO
//! - `test_subscribe_*`: subscription delivery and observer shapes

mod common;

use std::time::Duration;

use common::MockServer;

use opclink_client::{ClientConfig, OpcClient, SubscriptionSettings, UserIdentity};
use opclink_types::{NodeId, StatusCode, UaDateTime, Variant};

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::builder()
        .endpoint(server.endpoint_url.clone())
        .request_timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_browse_root_finds_standard_folders() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let result = client.browse(NodeId::ROOT_FOLDER).await.unwrap();
    assert!(result.status_code.is_good());

    let names: Vec<String> = result
        .references
        .unwrap_or_default()
        .iter()
        .map(|reference| reference.browse_name.name.as_ref().to_string())
        .collect();
    assert!(names.contains(&"Objects".to_string()));
    assert!(names.contains(&"Types".to_string()));
    assert!(names.contains(&"Views".to_string()));

    client.close().await;
}

#[tokio::test]
async fn test_read_server_time_is_current() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let value = client
        .read_value(NodeId::SERVER_CURRENT_TIME)
        .await
        .unwrap();
    assert!(value.is_good());
    let timestamp = match value.value {
        Some(Variant::DateTime(timestamp)) => timestamp,
        other => panic!("expected DateTime, got {:?}", other),
    };
    let skew = (UaDateTime::now().ticks() - timestamp.ticks()).abs();
    // Within 5 seconds of local time (100 ns ticks).
    assert!(skew < 5 * 10_000_000);

    client.close().await;
}

#[tokio::test]
async fn test_read_unknown_node_is_bad_status() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let value = client
        .read_value(NodeId::string(7, "DoesNotExist"))
        .await
        .unwrap();
    assert_eq!(value.status(), StatusCode::BAD_NODE_ID_UNKNOWN);

    client.close().await;
}

#[tokio::test]
async fn test_write_then_read_back() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let node: NodeId = "ns=2;s=TestInt".parse().unwrap();
    client.write_value(node.clone(), 42i32).await.unwrap();

    let value = client.read_value(node).await.unwrap();
    assert!(value.is_good());
    assert_eq!(value.value, Some(Variant::Int32(42)));

    client.close().await;
}

#[tokio::test]
async fn test_write_to_readonly_namespace_fails() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let result = client
        .write_value(NodeId::numeric(0, 2258), 1i32)
        .await;
    match result {
        Err(error) => assert_eq!(error.status(), StatusCode::BAD_NOT_WRITABLE),
        Ok(_) => panic!("write to ns=0 should fail"),
    }

    client.close().await;
}

#[tokio::test]
async fn test_username_identity_is_accepted() {
    let server = MockServer::spawn().await;
    let client = OpcClient::builder(config_for(&server))
        .user_identity(UserIdentity::UserName {
            username: "operator".into(),
            password: "secret".into(),
        })
        .connect()
        .await
        .unwrap();

    let value = client
        .read_value(NodeId::SERVER_CURRENT_TIME)
        .await
        .unwrap();
    assert!(value.is_good());

    client.close().await;
}

#[tokio::test]
async fn test_subscribe_server_time_delivers_notifications() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let subscription = client
        .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(
            500,
        )))
        .await
        .unwrap();
    let queue = subscription
        .monitor_queue(NodeId::SERVER_CURRENT_TIME, 32)
        .await
        .unwrap();

    // Expect at least 3 notifications within 3 seconds at a 500 ms interval.
    let mut received = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while received < 3 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, queue.pop()).await {
            Ok(value) => {
                assert!(value.is_good());
                assert!(matches!(value.value, Some(Variant::DateTime(_))));
                received += 1;
            }
            Err(_) => break,
        }
    }
    assert!(received >= 3, "only {} notifications in 3 s", received);

    subscription.delete().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_latest_observer_overwrites_slot() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let subscription = client
        .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(
            100,
        )))
        .await
        .unwrap();
    let mut latest = subscription
        .monitor_latest(NodeId::SERVER_CURRENT_TIME)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(3), latest.changed())
        .await
        .expect("no notification within 3 s")
        .unwrap();
    let first = latest.borrow_and_update().clone();
    assert!(first.is_good());

    tokio::time::timeout(Duration::from_secs(3), latest.changed())
        .await
        .expect("no second notification within 3 s")
        .unwrap();
    let second = latest.borrow().clone();
    assert!(second.source_timestamp >= first.source_timestamp);

    client.close().await;
}

#[tokio::test]
async fn test_unwrapped_observer_delivers_inner_value() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let node: NodeId = "ns=2;s=TestInt".parse().unwrap();
    client.write_value(node.clone(), 7i32).await.unwrap();

    let subscription = client
        .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(
            100,
        )))
        .await
        .unwrap();
    let mut unwrapped = subscription.monitor_unwrapped(node).await.unwrap();

    tokio::time::timeout(Duration::from_secs(3), unwrapped.changed())
        .await
        .expect("no notification within 3 s")
        .unwrap();
    assert_eq!(*unwrapped.borrow(), Variant::Int32(7));

    client.close().await;
}

#[tokio::test]
async fn test_back_write_reaches_server() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();

    let node: NodeId = "ns=2;s=TestInt".parse().unwrap();
    let subscription = client.subscribe().await.unwrap();
    let _queue = subscription.monitor_queue(node.clone(), 8).await.unwrap();

    subscription.write_back(node.clone(), 99i32).await;

    // The write is asynchronous; poll the value until it lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let value = client.read_value(node.clone()).await.unwrap();
        if value.value == Some(Variant::Int32(99)) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "back-write never landed"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    client.close().await;
}

#[tokio::test]
async fn test_back_write_failure_reaches_error_sink() {
    let server = MockServer::spawn().await;
    let client = OpcClient::connect(config_for(&server)).await.unwrap();
    let mut errors = client.back_write_errors().expect("first taker");

    let subscription = client.subscribe().await.unwrap();
    // ns=0 is read-only on the mock.
    subscription
        .write_back(NodeId::SERVER_CURRENT_TIME, 1i32)
        .await;

    let error = tokio::time::timeout(Duration::from_secs(3), errors.recv())
        .await
        .expect("no back-write error within 3 s")
        .expect("sink closed");
    assert_eq!(error.status, StatusCode::BAD_NOT_WRITABLE);

    client.close().await;
}
