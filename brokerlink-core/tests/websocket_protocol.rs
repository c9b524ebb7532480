//! Scenario S4 (delta updates observed end to end) and S6 (dead-link
//! heartbeat), driven directly against [`WebSocketManager`] without going
//! through the auth controller (the manager doesn't need a session to
//! connect; it just needs a `Cookie` header string).

mod common;

use std::sync::Arc;
use std::time::Duration;

use brokerlink_core::ws::FrameCode;
use brokerlink_core::{Error, WebSocketManager};
use common::{Action, MockServer};
use serde_json::json;

#[tokio::test]
async fn s4_delta_updates_are_resolved_against_previous_answer() {
    let server = MockServer::spawn().await;
    server
        .script_topic(
            "priceFeed",
            vec![
                Action::Answer(json!({"price": 100})),
                Action::Sleep(Duration::from_millis(20)),
                Action::Delta("=10\t+50}".to_string()),
                Action::Sleep(Duration::from_millis(20)),
                Action::Delta("=10\t-1\t+99}".to_string()),
            ],
        )
        .await;

    let manager = Arc::new(WebSocketManager::new(
        Duration::from_secs(20),
        Duration::from_secs(40),
    ));
    let ws_url = format!("ws://{}/", server.addr);
    manager.connect(&ws_url, "").await.expect("connect");

    let mut messages = manager.subscribe_messages().await.expect("subscribe");
    manager
        .subscribe("priceFeed", None)
        .await
        .expect("subscribe priceFeed");

    let answer = messages.recv().await.expect("answer frame");
    assert_eq!(answer.code, FrameCode::Answer);
    assert_eq!(answer.payload, json!({"price": 100}));

    let delta1 = messages.recv().await.expect("first delta frame");
    assert_eq!(delta1.code, FrameCode::Delta);
    assert_eq!(delta1.payload, json!({"price": 150}));

    let delta2 = messages.recv().await.expect("second delta frame");
    assert_eq!(delta2.code, FrameCode::Delta);
    assert_eq!(delta2.payload, json!({"price": 199}));
}

#[tokio::test]
async fn s6_heartbeat_timeout_disconnects_and_emits_one_error() {
    let server = MockServer::spawn().await;
    server.script_topic("silence", vec![]).await;

    let manager = Arc::new(WebSocketManager::new(
        Duration::from_millis(20),
        Duration::from_millis(60),
    ));
    let ws_url = format!("ws://{}/", server.addr);
    manager.connect(&ws_url, "").await.expect("connect");

    let mut errors = manager.subscribe_errors().await.expect("subscribe errors");
    assert!(manager.is_connected().await);

    let event = tokio::time::timeout(Duration::from_millis(500), errors.recv())
        .await
        .expect("an error arrives before the test timeout")
        .expect("error channel still open when it fires");
    assert!(event.message.contains("connection timeout"));

    // give disconnect() (spawned from the heartbeat task) a moment to run
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn delta_with_no_prior_answer_is_a_transport_error() {
    let server = MockServer::spawn().await;
    server
        .script_topic("broken", vec![Action::Delta("=1".to_string())])
        .await;

    let manager = Arc::new(WebSocketManager::new(
        Duration::from_secs(20),
        Duration::from_secs(40),
    ));
    let ws_url = format!("ws://{}/", server.addr);
    manager.connect(&ws_url, "").await.expect("connect");

    let mut errors = manager.subscribe_errors().await.expect("subscribe errors");
    manager.subscribe("broken", None).await.expect("subscribe");

    let event = tokio::time::timeout(Duration::from_millis(500), errors.recv())
        .await
        .expect("error arrives")
        .expect("channel open");
    assert!(event.message.contains("no prior answer"));
}

#[tokio::test]
async fn reconnecting_while_connected_fails() {
    let server = MockServer::spawn().await;
    let manager = Arc::new(WebSocketManager::new(
        Duration::from_secs(20),
        Duration::from_secs(40),
    ));
    let ws_url = format!("ws://{}/", server.addr);
    manager.connect(&ws_url, "").await.expect("first connect");

    let err = manager.connect(&ws_url, "").await;
    assert!(matches!(err, Err(Error::Transport(_))));
}
