//! Account-level holdings and cash balance.

use std::time::Duration;

use brokerlink_core::{AuthController, Result, subscribe_and_wait};
use serde::Deserialize;
use serde_json::Value;

/// One held position in the compact portfolio view.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Position {
    /// The held instrument's ISIN.
    pub isin: String,
    /// Number of units held (may be fractional).
    pub quantity: f64,
    /// Average purchase price.
    pub average_price: f64,
    /// Current market value in the account's currency.
    pub market_value: f64,
}

/// The account's full set of holdings, as returned by the
/// `compactPortfolio` topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Portfolio {
    /// Individual positions.
    pub positions: Vec<Position>,
}

/// Available and reserved cash, as returned by the `cash` topic.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CashBalance {
    /// Cash free to trade with.
    pub available: f64,
    /// Cash earmarked by open orders.
    pub reserved: f64,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn validate<T: serde::de::DeserializeOwned>(raw: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(raw.clone()).map_err(|err| err.to_string())
}

/// Fetches the account's current holdings.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn compact_portfolio(auth: &AuthController) -> Result<Portfolio> {
    subscribe_and_wait(
        auth,
        "compactPortfolio",
        None,
        validate::<Portfolio>,
        DEFAULT_TIMEOUT,
    )
    .await
}

/// Fetches the account's current cash balance.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn cash(auth: &AuthController) -> Result<CashBalance> {
    subscribe_and_wait(auth, "cash", None, validate::<CashBalance>, DEFAULT_TIMEOUT).await
}
