//! Crowd-sentiment indicator for an instrument.

use std::time::Duration;

use brokerlink_core::{AuthController, Result, subscribe_and_wait};
use serde::Deserialize;
use serde_json::{Value, json};

/// Aggregated investor sentiment for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SentimentSummary {
    /// Share of bullish votes, in `0.0..=1.0`.
    pub bullish: f64,
    /// Share of bearish votes, in `0.0..=1.0`.
    pub bearish: f64,
    /// Number of votes the summary is based on.
    pub sample_size: u64,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn validate(raw: &Value) -> std::result::Result<SentimentSummary, String> {
    serde_json::from_value(raw.clone()).map_err(|err| err.to_string())
}

/// Fetches the current crowd-sentiment summary for `isin`.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn sentiment(auth: &AuthController, isin: &str) -> Result<SentimentSummary> {
    subscribe_and_wait(
        auth,
        "sentiment",
        Some(json!({ "id": isin })),
        validate,
        DEFAULT_TIMEOUT,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_rejects_payload_missing_sample_size() {
        let raw = json!({ "bullish": 0.6, "bearish": 0.4 });
        let err = validate(&raw).unwrap_err();
        assert!(err.contains("sample_size"));
    }

    #[test]
    fn sentiment_parses_complete_payload() {
        let raw = json!({ "bullish": 0.6, "bearish": 0.4, "sample_size": 120 });
        let summary = validate(&raw).expect("valid sentiment");
        assert_eq!(summary.sample_size, 120);
    }
}
