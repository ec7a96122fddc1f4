// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Reconnect integration tests
//!
//! Server-restart scenarios: the supervisor must reopen the channel,
//! re-establish the session, and recreate subscriptions with their original
//! client handles while observers keep receiving notifications.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockServer, ServerState};

use opclink_client::{
    ClientConfig, ConnectionState, OpcClient, ReconnectConfig, SubscriptionSettings,
};
use opclink_types::{NodeId, Variant};

fn resilient_config(endpoint: &str) -> ClientConfig {
    ClientConfig::builder()
        .endpoint(endpoint.to_string())
        .request_timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(2))
        .reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 1.5,
            jitter: 0.1,
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_reconnect_after_server_restart() {
    let server = MockServer::spawn().await;
    let addr = server.addr;
    let state: Arc<ServerState> = Arc::clone(&server.state);

    let client = OpcClient::connect(resilient_config(&server.endpoint_url))
        .await
        .unwrap();
    let mut connection_state = client.state();
    assert_eq!(*connection_state.borrow(), ConnectionState::Connected);

    // Kill the server; the client must notice and enter reconnection.
    server.stop();
    drop(server);

    // Any in-flight request fails; the supervisor begins backoff.
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            connection_state.changed().await.unwrap();
            let current = *connection_state.borrow();
            if current != ConnectionState::Connected {
                break;
            }
        }
    })
    .await
    .expect("client never noticed the outage");

    // Restart on the same address with the same node store.
    let _server = MockServer::spawn_on(addr, state).await;

    client
        .wait_connected(Duration::from_secs(10))
        .await
        .expect("client never reconnected");

    let value = client
        .read_value(NodeId::SERVER_CURRENT_TIME)
        .await
        .unwrap();
    assert!(value.is_good());

    client.close().await;
}

#[tokio::test]
async fn test_subscription_survives_server_restart() {
    let server = MockServer::spawn().await;
    let addr = server.addr;
    let state: Arc<ServerState> = Arc::clone(&server.state);

    let client = OpcClient::connect(resilient_config(&server.endpoint_url))
        .await
        .unwrap();

    let subscription = client
        .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(
            200,
        )))
        .await
        .unwrap();
    let queue = subscription
        .monitor_queue(NodeId::SERVER_CURRENT_TIME, 64)
        .await
        .unwrap();

    // Confirm delivery before the outage.
    tokio::time::timeout(Duration::from_secs(3), queue.pop())
        .await
        .expect("no notification before restart");

    server.stop();
    drop(server);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let _server = MockServer::spawn_on(addr, state).await;

    // Drain anything delivered before the outage, then require fresh
    // notifications within 5 seconds of the restart.
    while queue.try_pop().is_some() {}
    let value = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("no notification within 5 s of restart");
    assert!(value.is_good());
    assert!(matches!(value.value, Some(Variant::DateTime(_))));

    client.close().await;
}

#[tokio::test]
async fn test_subscription_created_while_offline_is_applied_on_connect() {
    let server = MockServer::spawn().await;
    let addr = server.addr;
    let state: Arc<ServerState> = Arc::clone(&server.state);

    let client = OpcClient::connect(resilient_config(&server.endpoint_url))
        .await
        .unwrap();

    // Take the server down, then register a subscription while offline.
    server.stop();
    drop(server);
    let mut connection_state = client.state();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            connection_state.changed().await.unwrap();
            if *connection_state.borrow() != ConnectionState::Connected {
                break;
            }
        }
    })
    .await
    .expect("client never noticed the outage");

    let subscription = client
        .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(
            200,
        )))
        .await
        .expect("offline subscribe must register locally");
    let queue = subscription
        .monitor_queue(NodeId::SERVER_CURRENT_TIME, 16)
        .await
        .expect("offline monitor must register locally");

    let _server = MockServer::spawn_on(addr, state).await;
    client
        .wait_connected(Duration::from_secs(10))
        .await
        .expect("client never reconnected");

    let value = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("subscription registered offline never delivered");
    assert!(value.is_good());

    client.close().await;
}
