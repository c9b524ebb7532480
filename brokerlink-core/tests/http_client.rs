//! Properties 5 (rate limit spacing) and 6 (retry policy) of the HTTP
//! client, driven directly against the mock login endpoint.

mod common;

use std::time::Duration;

use brokerlink_core::BrokerConfig;
use brokerlink_core::http_client::HttpClient;
use common::MockServer;
use reqwest::Method;

#[tokio::test]
async fn rate_limiter_enforces_minimum_spacing_between_calls() {
    // The default rate (1 request/s) is a single-token bucket with no
    // burst allowance: the first call goes through immediately, the
    // second must wait out the full refill.
    let server = MockServer::spawn().await;
    let config = BrokerConfig {
        api_base: server.http_base(),
        http_retries: 0,
        ..BrokerConfig::default()
    };
    let client = HttpClient::new(&config).expect("client");
    let url = config.http_url("/auth/web/login");

    for _ in 0..2 {
        client
            .request(Method::POST, &url, &[], Some(serde_json::json!({})))
            .await
            .expect("request succeeds");
    }

    let calls = server.login_call_times().await;
    assert_eq!(calls.len(), 2);
    let gap = calls[1].duration_since(calls[0]);
    assert!(gap >= Duration::from_millis(900), "expected ~1s spacing, got {gap:?}");
}

#[tokio::test]
async fn retries_5xx_and_429_with_growing_backoff_not_4xx() {
    let server = MockServer::spawn().await;
    server.queue_login_statuses([500, 429, 200]).await;
    let config = BrokerConfig {
        api_base: server.http_base(),
        http_retries: 3,
        http_min_backoff: Duration::from_millis(20),
        http_max_backoff: Duration::from_millis(200),
        http_backoff_factor: 2,
        http_rate_per_second: 1000,
        ..BrokerConfig::default()
    };
    let client = HttpClient::new(&config).expect("client");
    let url = config.http_url("/auth/web/login");

    let response = client
        .request(Method::POST, &url, &[], Some(serde_json::json!({})))
        .await
        .expect("eventually succeeds after retries");
    assert!(response.status.is_success());

    let calls = server.login_call_times().await;
    assert_eq!(calls.len(), 3);
    let gap1 = calls[1].duration_since(calls[0]);
    let gap2 = calls[2].duration_since(calls[1]);
    assert!(gap1 >= Duration::from_millis(18), "gap1 was {gap1:?}");
    assert!(gap2 >= Duration::from_millis(36), "gap2 was {gap2:?}");
}

#[tokio::test]
async fn non_retryable_4xx_returns_immediately() {
    let server = MockServer::spawn().await;
    server.queue_login_statuses([400]).await;
    let config = BrokerConfig {
        api_base: server.http_base(),
        http_retries: 3,
        http_rate_per_second: 1000,
        ..BrokerConfig::default()
    };
    let client = HttpClient::new(&config).expect("client");
    let url = config.http_url("/auth/web/login");

    let response = client
        .request(Method::POST, &url, &[], Some(serde_json::json!({})))
        .await
        .expect("4xx is returned, not retried into an Err");
    assert_eq!(response.status.as_u16(), 400);
    assert_eq!(server.login_call_times().await.len(), 1);
}

#[tokio::test]
async fn exhausting_status_retries_still_returns_the_final_response() {
    let server = MockServer::spawn().await;
    server.queue_login_statuses([500, 500, 500, 500]).await;
    let config = BrokerConfig {
        api_base: server.http_base(),
        http_retries: 3,
        http_min_backoff: Duration::from_millis(5),
        http_max_backoff: Duration::from_millis(20),
        http_rate_per_second: 1000,
        ..BrokerConfig::default()
    };
    let client = HttpClient::new(&config).expect("client");
    let url = config.http_url("/auth/web/login");

    // The client only raises an Err for network-level failures; an
    // exhausted run of *status* retries hands the last response back to the
    // caller (e.g. login/2FA) to decode the server's error body from.
    let response = client
        .request(Method::POST, &url, &[], Some(serde_json::json!({})))
        .await
        .expect("a terminal 5xx is still a successful HTTP round trip");
    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(server.login_call_times().await.len(), 4);
}
