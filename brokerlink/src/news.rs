//! Instrument-linked news headlines.

use std::time::Duration;

use brokerlink_core::{AuthController, Result, subscribe_and_wait};
use serde::Deserialize;
use serde_json::{Value, json};

/// A single news headline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewsItem {
    /// Headline text.
    pub headline: String,
    /// Publishing source, e.g. `"dpa-AFX"`.
    pub source: String,
    /// Publish time, milliseconds since the Unix epoch.
    pub published_at: i64,
    /// Link to the full article, when the venue provides one.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct NewsResponse {
    items: Vec<NewsItem>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches recent news for `isin`.
///
/// No business-level retry: a failed or malformed response surfaces the
/// correlator's error directly to the caller.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn news(auth: &AuthController, isin: &str) -> Result<Vec<NewsItem>> {
    let response = subscribe_and_wait(
        auth,
        "news",
        Some(json!({ "id": isin })),
        |raw: &Value| serde_json::from_value::<NewsResponse>(raw.clone()).map_err(|err| err.to_string()),
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(response.items)
}
