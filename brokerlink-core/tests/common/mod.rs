//! Shared mock HTTP + WebSocket server standing in for the real brokerage
//! API in integration tests. Bound to a real loopback port so the library's
//! own `reqwest`/`tokio_tungstenite` clients can talk to it unmodified.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// A scripted action the mock WebSocket endpoint takes in reply to a `sub`
/// for a given topic.
#[derive(Clone)]
pub enum Action {
    /// Sleep before moving to the next action.
    Sleep(Duration),
    /// Send a full `A` (answer) frame.
    Answer(Value),
    /// Send a `D` (delta) frame; `instructions` is the raw tab-separated body.
    Delta(String),
    /// Send a `C` (complete) frame.
    Complete(Value),
    /// Send an `E` (error) frame.
    Error(Value),
    /// Send nothing, ever (used to provoke a request timeout).
    Silent,
}

struct Inner {
    login_status_queue: VecDeque<StatusCode>,
    login_calls: Vec<std::time::Instant>,
    verify_cookies: Vec<String>,
    verify_status: StatusCode,
    session_status_queue: VecDeque<StatusCode>,
    session_calls: Vec<std::time::Instant>,
    session_cookies: Vec<String>,
    scripts: HashMap<String, Vec<Action>>,
    subs: Vec<(u32, String, Value)>,
    unsubs: Vec<u32>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            login_status_queue: VecDeque::new(),
            login_calls: Vec::new(),
            verify_cookies: Vec::new(),
            verify_status: StatusCode::OK,
            session_status_queue: VecDeque::new(),
            session_calls: Vec::new(),
            session_cookies: Vec::new(),
            scripts: HashMap::new(),
            subs: Vec::new(),
            unsubs: Vec::new(),
        }
    }
}

/// Handle to a running mock server plus the knobs tests use to script it.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<Inner>>,
}

impl MockServer {
    /// Starts a mock server on an OS-assigned loopback port.
    pub async fn spawn() -> Self {
        let state = Arc::new(Mutex::new(Inner::default()));
        let app = Router::new()
            .route("/auth/web/login", post(login))
            .route("/auth/web/login/{process_id}/{code}", post(verify))
            .route("/auth/web/session", get(session))
            .route("/", get(ws_upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    /// Base HTTP URL, e.g. `http://127.0.0.1:54321`.
    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues the HTTP status returned by successive `/auth/web/login` calls.
    /// Once the queue is drained, further calls return `200 OK`.
    pub async fn queue_login_statuses(&self, statuses: impl IntoIterator<Item = u16>) {
        let mut inner = self.state.lock().await;
        inner.login_status_queue = statuses
            .into_iter()
            .map(|s| StatusCode::from_u16(s).expect("valid status"))
            .collect();
    }

    /// Sets the `Set-Cookie` headers and status returned by 2FA verification.
    pub async fn set_verify_response(&self, status: u16, cookies: Vec<String>) {
        let mut inner = self.state.lock().await;
        inner.verify_status = StatusCode::from_u16(status).expect("valid status");
        inner.verify_cookies = cookies;
    }

    /// Queues the HTTP status returned by successive `/auth/web/session`
    /// calls, optionally replacing the cookie jar on success.
    pub async fn queue_session_statuses(&self, statuses: impl IntoIterator<Item = u16>) {
        let mut inner = self.state.lock().await;
        inner.session_status_queue = statuses
            .into_iter()
            .map(|s| StatusCode::from_u16(s).expect("valid status"))
            .collect();
    }

    /// Sets the `Set-Cookie` headers returned by a successful session refresh.
    pub async fn set_session_cookies(&self, cookies: Vec<String>) {
        self.state.lock().await.session_cookies = cookies;
    }

    /// Registers the scripted frame sequence the WebSocket endpoint plays
    /// back when it sees a `sub` for `topic`.
    pub async fn script_topic(&self, topic: impl Into<String>, actions: Vec<Action>) {
        self.state
            .lock()
            .await
            .scripts
            .insert(topic.into(), actions);
    }

    /// Timestamps of every `/auth/web/login` call observed so far.
    pub async fn login_call_times(&self) -> Vec<std::time::Instant> {
        self.state.lock().await.login_calls.clone()
    }

    /// Timestamps of every `/auth/web/session` call observed so far.
    pub async fn session_call_times(&self) -> Vec<std::time::Instant> {
        self.state.lock().await.session_calls.clone()
    }

    /// Every `unsub <id>` frame the WebSocket endpoint has received.
    pub async fn unsub_ids(&self) -> Vec<u32> {
        self.state.lock().await.unsubs.clone()
    }
}

fn json_response(status: StatusCode, body: Value, cookies: &[String]) -> Response {
    let mut response = Json(body).into_response();
    *response.status_mut() = status;
    for cookie in cookies {
        if let Ok(value) = cookie.parse() {
            response
                .headers_mut()
                .append(HeaderName::from_static("set-cookie"), value);
        }
    }
    response
}

async fn login(State(state): State<Arc<Mutex<Inner>>>, _body: Json<Value>) -> Response {
    let mut inner = state.lock().await;
    inner.login_calls.push(std::time::Instant::now());
    let status = inner
        .login_status_queue
        .pop_front()
        .unwrap_or(StatusCode::OK);
    if status.is_success() {
        json_response(status, json!({ "processId": "p-1" }), &[])
    } else {
        json_response(status, json!({ "message": "login rejected" }), &[])
    }
}

async fn verify(
    State(state): State<Arc<Mutex<Inner>>>,
    Path((_process_id, _code)): Path<(String, String)>,
    _body: Json<Value>,
) -> Response {
    let inner = state.lock().await;
    json_response(inner.verify_status, json!({}), &inner.verify_cookies)
}

async fn session(State(state): State<Arc<Mutex<Inner>>>) -> Response {
    let mut inner = state.lock().await;
    inner.session_calls.push(std::time::Instant::now());
    let status = inner
        .session_status_queue
        .pop_front()
        .unwrap_or(StatusCode::OK);
    let cookies = if status.is_success() {
        inner.session_cookies.clone()
    } else {
        Vec::new()
    };
    json_response(status, json!({}), &cookies)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<Mutex<Inner>>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<Mutex<Inner>>) {
    // First frame is the `connect 31 {...}` handshake; consume and ignore it.
    let Some(Ok(Message::Text(_connect))) = socket.recv().await else {
        return;
    };

    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(rest) = text.strip_prefix("sub ") {
                    let mut parts = rest.splitn(2, ' ');
                    let Some(id) = parts.next().and_then(|s| s.parse::<u32>().ok()) else {
                        continue;
                    };
                    let body = parts.next().unwrap_or("{}");
                    let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
                    let topic = payload
                        .get("type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();

                    let actions = {
                        let mut inner = state.lock().await;
                        inner.subs.push((id, topic.clone(), payload));
                        inner.scripts.get(&topic).cloned().unwrap_or_default()
                    };

                    for action in actions {
                        match action {
                            Action::Sleep(d) => tokio::time::sleep(d).await,
                            Action::Answer(v) => {
                                let frame = format!("{id} A {v}");
                                if socket.send(Message::text(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Action::Delta(instructions) => {
                                let frame = format!("{id} D {instructions}");
                                if socket.send(Message::text(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Action::Complete(v) => {
                                let frame = format!("{id} C {v}");
                                if socket.send(Message::text(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Action::Error(v) => {
                                let frame = format!("{id} E {v}");
                                if socket.send(Message::text(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Action::Silent => {}
                        }
                    }
                } else if let Some(rest) = text.strip_prefix("unsub ") {
                    if let Ok(id) = rest.trim().parse::<u32>() {
                        state.lock().await.unsubs.push(id);
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return,
        }
    }
}
