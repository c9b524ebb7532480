//! Quotes, history, instrument metadata and symbol search.

use std::time::Duration;

use brokerlink_core::{AuthController, Result, subscribe_and_wait};
use serde::Deserialize;
use serde_json::{Value, json};

/// One side of a two-sided quote.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PriceLevel {
    /// Quoted price.
    pub price: f64,
    /// Size available at `price`, when the venue reports it.
    pub size: Option<f64>,
}

/// Best bid/ask snapshot for an instrument, as returned by the `ticker` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerSnapshot {
    /// Best bid.
    pub bid: PriceLevel,
    /// Best ask.
    pub ask: PriceLevel,
    /// Last traded price, when reported.
    pub last: Option<f64>,
}

/// A single OHLC bar. Consumed as an opaque value; no indicator math lives
/// in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Candle {
    /// Bar start time, milliseconds since the Unix epoch.
    pub time: i64,
    /// Opening price.
    pub open: f64,
    /// Highest traded price in the bar.
    pub high: f64,
    /// Lowest traded price in the bar.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume in the bar.
    pub volume: f64,
}

/// Response shape of the `aggregateHistory` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct AggregateHistoryResponse {
    candles: Vec<Candle>,
}

/// Static metadata for a tradeable instrument.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentDetails {
    /// The instrument's ISIN.
    pub isin: String,
    /// Display name.
    pub name: String,
    /// ISO 4217 trading currency.
    pub currency: String,
    /// Primary listing venue.
    pub exchange: String,
}

/// One hit of a symbol search (the `neonSearch` topic).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstrumentSummary {
    /// The instrument's ISIN.
    pub isin: String,
    /// Display name.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SearchResponse {
    results: Vec<InstrumentSummary>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn validate<T: serde::de::DeserializeOwned>(raw: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(raw.clone()).map_err(|err| err.to_string())
}

/// Fetches the current best bid/ask for `isin`.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn ticker(auth: &AuthController, isin: &str) -> Result<TickerSnapshot> {
    subscribe_and_wait(
        auth,
        "ticker",
        Some(json!({ "id": isin })),
        validate::<TickerSnapshot>,
        DEFAULT_TIMEOUT,
    )
    .await
}

/// Fetches an OHLC candle history for `isin` over `range` at `resolution`
/// (both opaque strings forwarded to the server, e.g. `"1d"` / `"5m"`).
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn aggregate_history(
    auth: &AuthController,
    isin: &str,
    range: &str,
    resolution: &str,
) -> Result<Vec<Candle>> {
    let response = subscribe_and_wait(
        auth,
        "aggregateHistory",
        Some(json!({ "id": isin, "range": range, "resolution": resolution })),
        validate::<AggregateHistoryResponse>,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(response.candles)
}

/// Fetches static metadata for `isin`.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn instrument(auth: &AuthController, isin: &str) -> Result<InstrumentDetails> {
    subscribe_and_wait(
        auth,
        "instrument",
        Some(json!({ "id": isin })),
        validate::<InstrumentDetails>,
        DEFAULT_TIMEOUT,
    )
    .await
}

/// Symbol search over free-text `query` (the `neonSearch` topic).
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn search(auth: &AuthController, query: &str) -> Result<Vec<InstrumentSummary>> {
    let response = subscribe_and_wait(
        auth,
        "neonSearch",
        Some(json!({ "query": query })),
        validate::<SearchResponse>,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(response.results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_snapshot_deserializes_without_optional_fields() {
        let raw = json!({
            "bid": { "price": 100.0 },
            "ask": { "price": 101.0 },
        });
        let snapshot: TickerSnapshot = validate(&raw).expect("valid ticker payload");
        assert_eq!(snapshot.bid.price, 100.0);
        assert_eq!(snapshot.ask.size, None);
        assert_eq!(snapshot.last, None);
    }

    #[test]
    fn ticker_snapshot_rejects_missing_ask() {
        let raw = json!({ "bid": { "price": 100.0 } });
        let err = validate::<TickerSnapshot>(&raw).unwrap_err();
        assert!(err.contains("ask"));
    }
}
