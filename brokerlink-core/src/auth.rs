//! The authentication/session state machine: login, 2FA verification,
//! single-flight session refresh, and the lazy `ensure_authenticated` entry
//! point used by every adapter call.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use reqwest::Method;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::BrokerConfig;
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::http_client::{self, HttpClient};
use crate::keystore::KeyStore;
use crate::ws::WebSocketManager;

/// Where the state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No session. Nothing has been attempted, or a fatal error reset us.
    Unauthenticated,
    /// `login` succeeded; waiting for the 2FA code.
    AwaitingTwoFactor,
    /// Fully authenticated with a live session and an open WebSocket.
    Authenticated,
}

/// Phone number and PIN used to perform the initial login.
///
/// Stored for the lifetime of the controller so `ensure_authenticated` can
/// kick off a login on the caller's behalf the first time it's needed.
#[derive(Clone)]
pub struct Credentials {
    /// E.164 phone number, e.g. `+491234567890`.
    pub phone_number: String,
    /// The account PIN.
    pub pin: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("phone_number", &mask_phone_number(&self.phone_number))
            .field("pin", &"<redacted>")
            .finish()
    }
}

struct StateInner {
    status: AuthStatus,
    process_id: Option<String>,
    session_expires_at: Option<Instant>,
    cookies: CookieJar,
}

type RefreshFuture = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

/// Orchestrates login, 2FA, session refresh and WebSocket connect.
///
/// Owns the cookie jar and `sessionExpiresAt` exclusively; the WebSocket
/// manager it drives knows nothing about either.
pub struct AuthController {
    config: BrokerConfig,
    http: HttpClient,
    ws: Arc<WebSocketManager>,
    key_store: Arc<KeyStore>,
    credentials: Credentials,
    state: Arc<RwLock<StateInner>>,
    refresh_inflight: Arc<Mutex<Option<RefreshFuture>>>,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "processId")]
    process_id: String,
}

impl AuthController {
    /// Builds a controller for the given config, credentials and key store,
    /// driving the given WebSocket manager.
    pub fn new(
        config: BrokerConfig,
        credentials: Credentials,
        key_store: Arc<KeyStore>,
        ws: Arc<WebSocketManager>,
    ) -> Result<Self> {
        let api_host = config.api_host()?;
        let http = HttpClient::new(&config)?;
        Ok(Self {
            config,
            http,
            ws,
            key_store,
            credentials,
            state: Arc::new(RwLock::new(StateInner {
                status: AuthStatus::Unauthenticated,
                process_id: None,
                session_expires_at: None,
                cookies: CookieJar::new(api_host),
            })),
            refresh_inflight: Arc::new(Mutex::new(None)),
        })
    }

    /// The current state machine status.
    pub async fn status(&self) -> AuthStatus {
        self.state.read().await.status
    }

    /// `POST /auth/web/login` with `{phoneNumber, pin}`. Moves to
    /// `AwaitingTwoFactor` on success.
    pub async fn login(&self) -> Result<()> {
        let url = self.config.http_url("/auth/web/login");
        let body = json!({
            "phoneNumber": self.credentials.phone_number,
            "pin": self.credentials.pin.expose_secret(),
        });
        let response = self.http.request(Method::POST, &url, &[], Some(body)).await?;
        if !response.status.is_success() {
            let message = http_client::extract_error_message(&response.body, "login failed");
            return Err(Error::Authentication(message));
        }
        let parsed: LoginResponse = response.json()?;

        let mut state = self.state.write().await;
        state.process_id = Some(parsed.process_id);
        state.status = AuthStatus::AwaitingTwoFactor;
        Ok(())
    }

    /// `POST /auth/web/login/{processId}/{code}` with `{deviceKey}`. On
    /// success, stores the returned cookies, sets the session expiry, moves
    /// to `Authenticated`, and opens the WebSocket using the rendered
    /// `Cookie` header.
    pub async fn verify_two_factor(&self, code: &str) -> Result<()> {
        let process_id = {
            let state = self.state.read().await;
            state
                .process_id
                .clone()
                .ok_or_else(|| Error::Authentication("no login in progress".to_string()))?
        };

        let key_pair = self.key_store.load_or_generate()?;
        let device_key = key_pair.public_key_base64()?;

        let url = self
            .config
            .http_url(&format!("/auth/web/login/{process_id}/{code}"));
        let body = json!({ "deviceKey": device_key });
        let response = self.http.request(Method::POST, &url, &[], Some(body)).await?;
        if !response.status.is_success() {
            let message = http_client::extract_error_message(&response.body, "2FA verification failed");
            return Err(Error::Authentication(message));
        }
        if response.set_cookie_headers.is_empty() {
            return Err(Error::Authentication("no cookies received".to_string()));
        }

        let cookie_header = {
            let mut state = self.state.write().await;
            state
                .cookies
                .store_set_cookie_headers(response.set_cookie_headers.iter().map(String::as_str));
            state.session_expires_at = Some(Instant::now() + self.config.session_duration);
            state.status = AuthStatus::Authenticated;
            state.cookies.render_header()
        };

        let ws_url = self.config.ws_url()?;
        if let Err(err) = self.ws.connect(&ws_url, &cookie_header).await {
            let mut state = self.state.write().await;
            state.status = AuthStatus::Unauthenticated;
            state.session_expires_at = None;
            return Err(err);
        }
        Ok(())
    }

    /// Tears down the WebSocket and resets to `Unauthenticated`.
    pub async fn disconnect(&self) {
        self.ws.disconnect().await;
        let mut state = self.state.write().await;
        state.status = AuthStatus::Unauthenticated;
        state.process_id = None;
        state.session_expires_at = None;
    }

    /// Ensures the session is valid, refreshing it if it's within
    /// `session_refresh_buffer` of expiry. Fails if not authenticated.
    ///
    /// Concurrent callers observing an expiring session share a single
    /// in-flight refresh: the first caller starts it, later callers await
    /// the same [`Shared`] future, and the slot is cleared by the future's
    /// own body before it resolves.
    pub async fn ensure_valid_session(&self) -> Result<()> {
        let needs_refresh = {
            let state = self.state.read().await;
            match state.status {
                AuthStatus::Authenticated => {
                    let expires_at = state
                        .session_expires_at
                        .expect("session_expires_at is set whenever status is Authenticated");
                    Instant::now() + self.config.session_refresh_buffer >= expires_at
                }
                _ => return Err(Error::Authentication("not authenticated".to_string())),
            }
        };

        if !needs_refresh {
            return Ok(());
        }

        let fut = self.refresh_future().await;
        fut.await.map_err(Error::Authentication)
    }

    async fn refresh_future(&self) -> RefreshFuture {
        let mut slot = self.refresh_inflight.lock().await;
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }

        let http = self.http.clone();
        let url = self.config.http_url("/auth/web/session");
        let state = self.state.clone();
        let session_duration = self.config.session_duration;
        let inflight = self.refresh_inflight.clone();

        let fut: BoxFuture<'static, std::result::Result<(), String>> = async move {
            let result = perform_refresh(http, url, state, session_duration)
                .await
                .map_err(|err| err.to_string());
            // Cleared by the body that actually runs, not by every awaiter,
            // so the slot is free for the next expiration exactly once this
            // refresh concludes.
            *inflight.lock().await = None;
            result
        }
        .boxed();

        let shared = fut.shared();
        *slot = Some(shared.clone());
        shared
    }

    /// Lazy authentication entry point used by every adapter call:
    ///
    /// - `Authenticated`: ensures the session is still valid, then returns.
    /// - `AwaitingTwoFactor`: fails with [`Error::TwoFactorRequired`].
    /// - `Unauthenticated`: initializes the device key, calls `login`, then
    ///   fails with [`Error::TwoFactorRequired`] so the caller prompts for a
    ///   code.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        let status = self.status().await;
        match status {
            AuthStatus::Authenticated => self.ensure_valid_session().await,
            AuthStatus::AwaitingTwoFactor => Err(Error::TwoFactorRequired {
                masked_phone: mask_phone_number(&self.credentials.phone_number),
            }),
            AuthStatus::Unauthenticated => {
                self.key_store.load_or_generate()?;
                self.login().await?;
                Err(Error::TwoFactorRequired {
                    masked_phone: mask_phone_number(&self.credentials.phone_number),
                })
            }
        }
    }

    /// The current `Cookie` request header, for callers that need it
    /// directly (e.g. the CLI, when reconnecting the WebSocket by hand).
    pub async fn cookie_header(&self) -> String {
        self.state.read().await.cookies.render_header()
    }

    /// The WebSocket manager this controller drives.
    pub fn websocket(&self) -> &Arc<WebSocketManager> {
        &self.ws
    }
}

async fn perform_refresh(
    http: HttpClient,
    url: String,
    state: Arc<RwLock<StateInner>>,
    session_duration: Duration,
) -> Result<()> {
    let cookie_header = state.read().await.cookies.render_header();
    let response = http
        .request(Method::GET, &url, &[("Cookie", cookie_header)], None)
        .await?;
    if !response.status.is_success() {
        let message = http_client::extract_error_message(&response.body, "session refresh failed");
        return Err(Error::Authentication(message));
    }

    let mut state = state.write().await;
    if !response.set_cookie_headers.is_empty() {
        state
            .cookies
            .store_set_cookie_headers(response.set_cookie_headers.iter().map(String::as_str));
    }
    state.session_expires_at = Some(Instant::now() + session_duration);
    Ok(())
}

/// Masks a phone number for display, keeping the leading `+` and the first
/// 3 and last 4 significant digits, e.g. `+491234567890` -> `+491*****7890`.
fn mask_phone_number(phone: &str) -> String {
    let (prefix, digits): (&str, &str) = if let Some(rest) = phone.strip_prefix('+') {
        ("+", rest)
    } else {
        ("", phone)
    };

    let chars: Vec<char> = digits.chars().collect();
    if chars.len() <= 7 {
        return format!("{prefix}{}", "*".repeat(chars.len()));
    }

    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    let masked_len = chars.len() - 7;
    format!("{prefix}{head}{}{tail}", "*".repeat(masked_len))
}
