//! Owns the single duplex WebSocket connection to the brokerage: frames the
//! line-oriented text sub-protocol, allocates subscription ids, decodes
//! delta updates, drives the heartbeat, and fans parsed messages and
//! transport errors out to observers.

mod delta;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

/// The code byte a server frame carries, identifying its semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCode {
    /// Full payload.
    Answer,
    /// Delta against the previous payload.
    Delta,
    /// Terminal frame for this subscription.
    Complete,
    /// Error frame.
    Error,
}

/// A decoded server message, already delta-resolved to its full JSON payload.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Subscription id this message belongs to.
    pub id: u32,
    /// The frame's code.
    pub code: FrameCode,
    /// The fully decoded JSON payload (for `Error` frames, the raw error body).
    pub payload: Value,
}

/// A transport-level error, optionally addressed to a specific subscription.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    /// The subscription this error is about, if any.
    pub id: Option<u32>,
    /// Human-readable error message.
    pub message: String,
}

type WsWriter = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsReader = futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// State shared between the manager's public methods and the background
/// reader/heartbeat tasks for a single connection.
struct Shared {
    write: Mutex<WsWriter>,
    previous_text: Mutex<HashMap<u32, String>>,
    last_frame_at: Mutex<Instant>,
    msg_tx: broadcast::Sender<IncomingMessage>,
    err_tx: broadcast::Sender<TransportEvent>,
}

struct Connection {
    shared: Arc<Shared>,
    next_id: AtomicU32,
    unsub_tx: mpsc::Sender<u32>,
    reader_task: tokio::task::JoinHandle<()>,
    heartbeat_task: tokio::task::JoinHandle<()>,
    unsub_task: tokio::task::JoinHandle<()>,
}

/// Manages one WebSocket connection to the brokerage.
///
/// Not reentrant: calling [`WebSocketManager::connect`] while already
/// connecting or connected fails.
pub struct WebSocketManager {
    connection: RwLock<Option<Connection>>,
    heartbeat_period: Duration,
    heartbeat_timeout: Duration,
}

impl WebSocketManager {
    /// Creates a manager with the given heartbeat period/timeout.
    pub fn new(heartbeat_period: Duration, heartbeat_timeout: Duration) -> Self {
        Self {
            connection: RwLock::new(None),
            heartbeat_period,
            heartbeat_timeout,
        }
    }

    /// Whether the manager currently holds an open connection.
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Subscribes a receiver to every decoded message on the current
    /// connection. Returns an error if not connected.
    pub async fn subscribe_messages(&self) -> Result<broadcast::Receiver<IncomingMessage>> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or_else(not_connected)?;
        Ok(connection.shared.msg_tx.subscribe())
    }

    /// Subscribes a receiver to every transport error on the current
    /// connection. Returns an error if not connected.
    pub async fn subscribe_errors(&self) -> Result<broadcast::Receiver<TransportEvent>> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or_else(not_connected)?;
        Ok(connection.shared.err_tx.subscribe())
    }

    /// Opens the WebSocket connection at `ws_url`, sending `cookie_header`
    /// as the `Cookie` request header, and sends the initial connect frame.
    ///
    /// Takes `Arc<Self>` because the heartbeat task needs to call back into
    /// [`WebSocketManager::disconnect`] on timeout.
    pub async fn connect(self: &Arc<Self>, ws_url: &str, cookie_header: &str) -> Result<()> {
        {
            let guard = self.connection.read().await;
            if guard.is_some() {
                return Err(Error::Transport("already connected".to_string()));
            }
        }

        let mut request = ws_url
            .into_client_request()
            .map_err(|err| Error::Transport(format!("invalid websocket url: {err}")))?;
        request.headers_mut().insert(
            "Cookie",
            cookie_header
                .parse()
                .map_err(|_| Error::Transport("cookie header contains invalid characters".to_string()))?,
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| Error::Transport(format!("websocket connect failed: {err}")))?;

        let (mut write, read) = stream.split();

        let connect_body = serde_json::json!({
            "locale": "en",
            "platformId": "webtrading",
            "platformVersion": "browser",
            "clientId": "app.traderepublic.com",
            "clientVersion": "1",
        });
        let connect_frame = format!("connect 31 {connect_body}");
        write
            .send(WsMessage::text(connect_frame))
            .await
            .map_err(|err| Error::Transport(format!("failed to send connect frame: {err}")))?;

        let (msg_tx, _) = broadcast::channel(256);
        let (err_tx, _) = broadcast::channel(64);

        let shared = Arc::new(Shared {
            write: Mutex::new(write),
            previous_text: Mutex::new(HashMap::new()),
            last_frame_at: Mutex::new(Instant::now()),
            msg_tx,
            err_tx,
        });

        let (unsub_tx, unsub_rx) = mpsc::channel(64);

        let reader_task = tokio::spawn(run_reader(shared.clone(), read));
        let unsub_task = tokio::spawn(run_unsub_drain(shared.clone(), unsub_rx));
        let heartbeat_task = tokio::spawn(run_heartbeat(
            self.clone(),
            shared.clone(),
            self.heartbeat_period,
            self.heartbeat_timeout,
        ));

        *self.connection.write().await = Some(Connection {
            shared,
            next_id: AtomicU32::new(1),
            unsub_tx,
            reader_task,
            heartbeat_task,
            unsub_task,
        });
        Ok(())
    }

    /// Allocates the next subscription id, merges `{type: topic}` with
    /// `payload`, and sends `sub <id> <json>`.
    pub async fn subscribe(&self, topic: &str, payload: Option<Value>) -> Result<u32> {
        if topic.is_empty() {
            return Err(Error::Config("subscription topic must not be empty".to_string()));
        }

        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or_else(not_connected)?;

        let id = connection.next_id.fetch_add(1, Ordering::SeqCst);

        let mut body = match payload {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(Error::Config(
                    "subscription payload must be a JSON object".to_string(),
                ));
            }
            None => Map::new(),
        };
        body.insert("type".to_string(), Value::String(topic.to_string()));

        let frame = format!("sub {id} {}", Value::Object(body));
        send_frame(&connection.shared, frame).await?;
        Ok(id)
    }

    /// Sends `unsub <id>` and drops per-id delta state.
    pub async fn unsubscribe(&self, id: u32) -> Result<()> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or_else(not_connected)?;
        connection.shared.previous_text.lock().await.remove(&id);
        send_frame(&connection.shared, format!("unsub {id}")).await
    }

    /// Returns a sender for best-effort, fire-and-forget unsubscribe
    /// requests on the current connection.
    ///
    /// Used by the request correlator's cleanup guard, whose `Drop` impl
    /// cannot `.await` the normal [`WebSocketManager::unsubscribe`] call:
    /// a synchronous [`mpsc::Sender::try_send`] onto this channel is
    /// drained by a background task instead.
    pub async fn unsubscribe_sender(&self) -> Result<mpsc::Sender<u32>> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or_else(not_connected)?;
        Ok(connection.unsub_tx.clone())
    }

    /// Cancels the heartbeat, closes the transport, clears per-subscription
    /// state, and transitions to disconnected. Safe to call when not
    /// connected.
    pub async fn disconnect(&self) {
        let mut guard = self.connection.write().await;
        if let Some(connection) = guard.take() {
            connection.reader_task.abort();
            connection.heartbeat_task.abort();
            connection.unsub_task.abort();
            let mut write = connection.shared.write.lock().await;
            let _ = write.close().await;
        }
    }
}

async fn send_frame(shared: &Shared, frame: String) -> Result<()> {
    let mut write = shared.write.lock().await;
    write
        .send(WsMessage::text(frame))
        .await
        .map_err(|err| Error::Transport(format!("send failed: {err}")))
}

async fn run_reader(shared: Arc<Shared>, mut read: WsReader) {
    while let Some(msg) = read.next().await {
        *shared.last_frame_at.lock().await = Instant::now();
        match msg {
            Ok(WsMessage::Text(text)) => {
                if let Err(err) = handle_frame(&shared, &text).await {
                    let _ = shared.err_tx.send(TransportEvent {
                        id: None,
                        message: err.to_string(),
                    });
                }
            }
            Ok(WsMessage::Close(_)) => {
                let _ = shared.err_tx.send(TransportEvent {
                    id: None,
                    message: "connection closed".to_string(),
                });
                break;
            }
            Ok(_) => {
                // ignore ping/pong/binary frames: protocol is text-only
            }
            Err(err) => {
                let _ = shared.err_tx.send(TransportEvent {
                    id: None,
                    message: format!("websocket error: {err}"),
                });
                break;
            }
        }
    }
}

async fn handle_frame(shared: &Shared, raw: &str) -> Result<()> {
    let mut parts = raw.splitn(3, ' ');
    let id: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Transport(format!("malformed frame header: {raw:?}")))?;
    let code = parts
        .next()
        .ok_or_else(|| Error::Transport(format!("malformed frame header: {raw:?}")))?;
    let body = parts.next().unwrap_or("");

    match code {
        "A" => {
            let payload: Value = serde_json::from_str(body)
                .map_err(|err| Error::Transport(format!("could not parse answer body: {err}")))?;
            shared.previous_text.lock().await.insert(id, body.to_string());
            let _ = shared.msg_tx.send(IncomingMessage {
                id,
                code: FrameCode::Answer,
                payload,
            });
            Ok(())
        }
        "D" => {
            let mut previous_text = shared.previous_text.lock().await;
            let Some(previous) = previous_text.get(&id).cloned() else {
                drop(previous_text);
                let message = format!("delta received for id {id} with no prior answer");
                let _ = shared.err_tx.send(TransportEvent {
                    id: Some(id),
                    message,
                });
                // Already reported to the id-scoped error channel above;
                // returning Ok keeps the caller from emitting a second,
                // unaddressed copy of the same failure.
                return Ok(());
            };
            let rendered = delta::apply_delta(&previous, body)?;
            let payload: Value = serde_json::from_str(&rendered).map_err(|err| {
                Error::Transport(format!("could not parse delta-rendered body: {err}"))
            })?;
            previous_text.insert(id, rendered);
            drop(previous_text);
            let _ = shared.msg_tx.send(IncomingMessage {
                id,
                code: FrameCode::Delta,
                payload,
            });
            Ok(())
        }
        "C" => {
            let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            shared.previous_text.lock().await.remove(&id);
            let _ = shared.msg_tx.send(IncomingMessage {
                id,
                code: FrameCode::Complete,
                payload,
            });
            Ok(())
        }
        "E" => {
            let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            let _ = shared.msg_tx.send(IncomingMessage {
                id,
                code: FrameCode::Error,
                payload,
            });
            Ok(())
        }
        other => Err(Error::Transport(format!("unknown frame code {other:?}"))),
    }
}

async fn run_unsub_drain(shared: Arc<Shared>, mut rx: mpsc::Receiver<u32>) {
    while let Some(id) = rx.recv().await {
        shared.previous_text.lock().await.remove(&id);
        let _ = send_frame(&shared, format!("unsub {id}")).await;
    }
}

async fn run_heartbeat(
    manager: Arc<WebSocketManager>,
    shared: Arc<Shared>,
    period: Duration,
    timeout: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        let last = *shared.last_frame_at.lock().await;
        if last.elapsed() >= timeout {
            let _ = shared.err_tx.send(TransportEvent {
                id: None,
                message: format!(
                    "connection timeout, no message received in {}s",
                    timeout.as_secs()
                ),
            });
            // disconnect() takes the connection write lock; spawning avoids
            // deadlocking on a heartbeat task that's itself owned by that
            // same connection.
            tokio::spawn(async move { manager.disconnect().await });
            break;
        }
    }
}

fn not_connected() -> Error {
    Error::Transport("not connected".to_string())
}

pub use delta::apply_delta;
