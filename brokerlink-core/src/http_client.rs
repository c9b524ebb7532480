//! A rate-limited, retrying HTTP client used only for the login, 2FA and
//! session-refresh endpoints.
//!
//! Every other component of the core talks to the brokerage exclusively
//! over the WebSocket; this client exists solely to obtain and refresh the
//! session cookies that the WebSocket connect handshake needs.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The outcome of a successful HTTP call: status code plus parsed body and
/// response headers, retained long enough for the caller to pull cookies
/// out of them.
pub struct HttpResponse {
    /// HTTP status code of the final attempt.
    pub status: StatusCode,
    /// Every `Set-Cookie` header value present on the response, in order.
    pub set_cookie_headers: Vec<String>,
    /// The raw response body, already read to completion.
    pub body: bytes::Bytes,
}

impl HttpResponse {
    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Rate-limited, retrying HTTP client.
///
/// A single process-wide token bucket (shared across every clone of this
/// client, since the limiter is held behind an `Arc`) caps the entry rate
/// of outgoing requests, independent of how many callers are retrying
/// concurrently.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    limiter: Arc<Limiter>,
    timeout: Duration,
    retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    backoff_factor: u32,
}

impl HttpClient {
    /// Builds a client from the given config.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let rate = NonZeroU32::new(config.http_rate_per_second.max(1)).expect("nonzero");
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));
        Ok(Self {
            client,
            limiter,
            timeout: config.http_timeout,
            retries: config.http_retries,
            min_backoff: config.http_min_backoff,
            max_backoff: config.http_max_backoff,
            backoff_factor: config.http_backoff_factor,
        })
    }

    /// Performs a request, retrying on network errors, 5xx and 429
    /// responses with exponential backoff. Other 4xx responses are
    /// returned immediately without retry so the caller can decode the
    /// error body.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<HttpResponse> {
        let total_attempts = self.retries + 1;
        let mut backoff = self.min_backoff;
        let mut last_err: Option<Error> = None;

        for attempt in 1..=total_attempts {
            self.limiter.until_ready().await;

            let retries_left = total_attempts - attempt;
            tracing::debug!(attempt, retries_left, %url, "sending http request");

            let outcome = self.send_once(method.clone(), url, extra_headers, body.clone()).await;

            match outcome {
                Ok(response) => {
                    if should_retry_status(response.status) && attempt < total_attempts {
                        tracing::warn!(
                            status = %response.status,
                            attempt,
                            retries_left,
                            "retryable http status, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, self.backoff_factor, self.max_backoff);
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt < total_attempts {
                        tracing::warn!(attempt, retries_left, "http request failed, backing off");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, self.backoff_factor, self.max_backoff);
                        continue;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Transport("http request failed".to_string())))
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<HttpResponse> {
        let mut builder = self.client.request(method, url);
        for (name, value) in extra_headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| Error::Transport(format!("request to {url} timed out")))??;

        let status = response.status();
        let set_cookie_headers = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            set_cookie_headers,
            body,
        })
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn next_backoff(current: Duration, factor: u32, max: Duration) -> Duration {
    (current * factor).min(max)
}

/// Best-effort extraction of a server-provided error message from a JSON
/// body, checking the conventional `message`/`errorMessage` fields before
/// falling back to a generic message.
pub fn extract_error_message(body: &bytes::Bytes, fallback: &str) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("errorMessage"))
                .and_then(|m| m.as_str().map(|s| s.to_string()))
        })
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_5xx_and_429_not_other_4xx() {
        assert!(should_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let first = next_backoff(min, 2, max);
        let second = next_backoff(first, 2, max);
        let third = next_backoff(second, 2, max);
        let fourth = next_backoff(third, 2, max);
        assert_eq!(first, Duration::from_secs(2));
        assert_eq!(second, Duration::from_secs(4));
        assert_eq!(third, Duration::from_secs(8));
        assert_eq!(fourth, Duration::from_secs(10));
    }

    #[test]
    fn extracts_message_field() {
        let body = bytes::Bytes::from(r#"{"message":"bad pin"}"#);
        assert_eq!(extract_error_message(&body, "fallback"), "bad pin");
    }

    #[test]
    fn extracts_error_message_field_as_fallback_name() {
        let body = bytes::Bytes::from(r#"{"errorMessage":"bad pin"}"#);
        assert_eq!(extract_error_message(&body, "fallback"), "bad pin");
    }

    #[test]
    fn falls_back_when_no_known_field() {
        let body = bytes::Bytes::from(r#"{"other":1}"#);
        assert_eq!(extract_error_message(&body, "fallback"), "fallback");
    }
}
