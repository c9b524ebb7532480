//! `subscribe_and_wait`: turns a streaming WebSocket subscription into a
//! one-shot typed request/response call, with validation, a deadline, and
//! guaranteed cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::auth::AuthController;
use crate::error::{Error, Result};
use crate::ws::FrameCode;

/// Subscribes to `topic` with `payload`, waits for the first matching
/// `Answer` (or `Error`) frame, validates it, and unsubscribes.
///
/// Ignores `Delta`/`Complete` frames for request/response purposes, since
/// the vast majority of topics answer with a single `Answer`. Guarantees:
/// `ensure_authenticated` runs first; cleanup (best-effort unsubscribe)
/// happens on every exit path, including the caller's task being dropped
/// mid-await.
pub async fn subscribe_and_wait<T>(
    auth: &AuthController,
    topic: &str,
    payload: Option<Value>,
    validate: impl Fn(&Value) -> std::result::Result<T, String>,
    timeout: Duration,
) -> Result<T> {
    auth.ensure_authenticated().await?;
    let ws = auth.websocket();

    let mut messages = ws.subscribe_messages().await?;
    let mut errors = ws.subscribe_errors().await?;

    let id = ws.subscribe(topic, payload).await?;
    let unsub_tx = ws.unsubscribe_sender().await.ok();
    let _guard = UnsubscribeGuard::new(unsub_tx, id);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = messages.recv() => {
                match msg {
                    Ok(incoming) if incoming.id == id => match incoming.code {
                        FrameCode::Answer => {
                            return validate(&incoming.payload)
                                .map_err(|_| Error::Validation(format!("invalid {topic} response format")));
                        }
                        FrameCode::Error => {
                            return Err(Error::Request(error_message(&incoming.payload)));
                        }
                        FrameCode::Delta | FrameCode::Complete => continue,
                    },
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Transport("websocket message stream closed".to_string()));
                    }
                }
            }
            err = errors.recv() => {
                match err {
                    Ok(event) if event.id.is_none() || event.id == Some(id) => {
                        return Err(Error::Transport(event.message));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Transport("websocket error stream closed".to_string()));
                    }
                }
            }
            _ = &mut deadline => {
                return Err(Error::Timeout(topic.to_string()));
            }
        }
    }
}

fn error_message(payload: &Value) -> String {
    payload
        .get("message")
        .or_else(|| payload.get("errorMessage"))
        .and_then(|v| v.as_str())
        .unwrap_or("API error")
        .to_string()
}

/// Fires a best-effort, fire-and-forget unsubscribe on drop.
///
/// A synchronous `Drop` impl can't `.await` [`WebSocketManager::unsubscribe`],
/// so it hands the id off to the manager's unsubscribe drain channel
/// instead — this is what makes cleanup run even when the calling task is
/// cancelled mid-`select!`, not only on a normal return.
struct UnsubscribeGuard {
    tx: Option<mpsc::Sender<u32>>,
    id: u32,
    fired: AtomicBool,
}

impl UnsubscribeGuard {
    fn new(tx: Option<mpsc::Sender<u32>>, id: u32) -> Self {
        Self {
            tx,
            id,
            fired: AtomicBool::new(false),
        }
    }
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(self.id);
        }
    }
}
