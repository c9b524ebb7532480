#![deny(missing_docs, clippy::unwrap_used)]
//! Transport and session core for a brokerage's private real-time market
//! and trading API.
//!
//! This crate owns the hard part: a single WebSocket connection multiplexing
//! many concurrent logical subscriptions, an authentication state machine
//! with cookie-based session renewal, and a request/response correlator
//! ([`correlator::subscribe_and_wait`]) that turns a streaming subscription
//! into a one-shot typed call. Feature-specific request builders and
//! response schemas are deliberately out of scope here; see the `brokerlink`
//! crate for those.

pub mod auth;
pub mod config;
pub mod cookies;
pub mod correlator;
pub mod error;
pub mod http_client;
pub mod keystore;
pub mod ws;

pub use auth::{AuthController, AuthStatus, Credentials};
pub use config::BrokerConfig;
pub use correlator::subscribe_and_wait;
pub use error::{Error, Result};
pub use keystore::{KeyPair, KeyStore};
pub use ws::{FrameCode, IncomingMessage, TransportEvent, WebSocketManager};
