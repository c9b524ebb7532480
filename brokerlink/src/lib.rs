#![deny(missing_docs, clippy::unwrap_used)]
//! Typed feature adapters over [`brokerlink_core`].
//!
//! `brokerlink-core` only knows about topics, subscription ids and raw JSON
//! payloads. This crate is the thin layer on top that a real application
//! actually calls: one module per feature family (market data, portfolio,
//! orders, news, sentiment), each function doing `ensure_authenticated` →
//! `subscribe_and_wait` → a `serde`-derived response type. The `Deserialize`
//! impl on each response struct *is* the validator: a payload that doesn't
//! match the shape we expect fails to parse, which `subscribe_and_wait`
//! turns into [`brokerlink_core::Error::Validation`].
//!
//! No business-level retry lives here (an adapter call either resolves or
//! surfaces the correlator's error); transport-level retry is entirely
//! `brokerlink-core`'s concern.

mod error;
pub mod market_data;
pub mod news;
pub mod orders;
pub mod portfolio;
pub mod sentiment;

pub use brokerlink_core::AuthController;
pub use error::{Error, Result};
