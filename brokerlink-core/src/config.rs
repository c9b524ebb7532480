//! Configuration knobs for the core.
//!
//! Gathers every tunable named by the system's configuration table into one
//! struct so adapters and callers never hand-roll the literal defaults.

use std::time::Duration;

/// Tunables for the HTTP client, WebSocket manager and request correlator.
///
/// All fields have defaults matching the reference configuration; callers
/// only need to override the ones they care about.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base URL of the brokerage API, e.g. `https://api.example.com`.
    pub api_base: String,
    /// How long an authenticated session is considered valid after login/refresh.
    pub session_duration: Duration,
    /// Refresh the session this long before `session_duration` elapses.
    pub session_refresh_buffer: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Sustained HTTP request rate, in requests per second.
    pub http_rate_per_second: u32,
    /// Number of retries after the initial attempt (so total attempts = retries + 1).
    pub http_retries: u32,
    /// Minimum backoff delay before a retry.
    pub http_min_backoff: Duration,
    /// Maximum backoff delay before a retry.
    pub http_max_backoff: Duration,
    /// Backoff multiplier applied after each retry.
    pub http_backoff_factor: u32,
    /// How often the WebSocket manager checks for a dead connection.
    pub ws_heartbeat_period: Duration,
    /// How long without an inbound frame before the connection is considered dead.
    pub ws_heartbeat_timeout: Duration,
    /// Default deadline for `subscribe_and_wait` when the caller doesn't specify one.
    pub subscribe_and_wait_default_timeout: Duration,
}

impl BrokerConfig {
    /// Builds a config pointed at the given API base URL, with every other
    /// knob set to the reference default.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    /// The host component of `api_base`, used to scope cookies and to
    /// resolve the config directory's platform defaults.
    pub fn api_host(&self) -> crate::error::Result<String> {
        let parsed = url::Url::parse(&self.api_base)?;
        parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| crate::error::Error::Config(format!("{} has no host", self.api_base)))
    }

    /// Joins `path` onto `api_base`, e.g. `/auth/web/login`.
    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    /// The WebSocket URL for the single endpoint at `<api_base>/`, derived
    /// by swapping the scheme (`https`->`wss`, `http`->`ws`).
    pub fn ws_url(&self) -> crate::error::Result<String> {
        let mut parsed = url::Url::parse(&self.api_base)?;
        let ws_scheme = match parsed.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(crate::error::Error::Config(format!(
                    "unsupported api_base scheme {other:?}"
                )));
            }
        };
        parsed
            .set_scheme(ws_scheme)
            .map_err(|_| crate::error::Error::Config("could not set websocket scheme".to_string()))?;
        Ok(parsed.join("/")?.to_string())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            session_duration: Duration::from_secs(290),
            session_refresh_buffer: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            http_rate_per_second: 1,
            http_retries: 3,
            http_min_backoff: Duration::from_secs(1),
            http_max_backoff: Duration::from_secs(10),
            http_backoff_factor: 2,
            ws_heartbeat_period: Duration::from_secs(20),
            ws_heartbeat_timeout: Duration::from_secs(40),
            subscribe_and_wait_default_timeout: Duration::from_secs(30),
        }
    }
}
