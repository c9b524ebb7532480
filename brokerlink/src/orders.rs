//! Order placement, status and cancellation.

use std::time::Duration;

use brokerlink_core::{AuthController, Result, subscribe_and_wait};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Market or limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Execute immediately at the best available price.
    Market,
    /// Execute only at `limit_price` or better.
    Limit,
}

/// A request to place a new order, sent as the `simpleCreateOrder` topic's
/// payload.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Instrument to trade.
    pub isin: String,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Quantity to trade.
    pub quantity: f64,
    /// Required for [`OrderType::Limit`], ignored otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

/// Server acknowledgement that an order was accepted for processing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderAck {
    /// Server-assigned order id.
    pub order_id: String,
    /// Status at acceptance time, typically `"pending"` or `"open"`.
    pub status: String,
}

/// Current state of a previously placed order, as returned by the `orders`
/// topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderStatus {
    /// Server-assigned order id.
    pub order_id: String,
    /// Instrument being traded.
    pub isin: String,
    /// Current lifecycle state, e.g. `"open"`, `"filled"`, `"cancelled"`.
    pub status: String,
    /// Quantity filled so far.
    pub filled_quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct OrdersSnapshot {
    orders: Vec<OrderStatus>,
}

/// Server acknowledgement that a cancel request was accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CancelAck {
    /// The order id that was cancelled.
    pub order_id: String,
    /// Whether the cancel was accepted.
    pub cancelled: bool,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn validate<T: serde::de::DeserializeOwned>(raw: &Value) -> std::result::Result<T, String> {
    serde_json::from_value(raw.clone()).map_err(|err| err.to_string())
}

/// Places a new order and waits for the server's acceptance acknowledgement.
///
/// This does not wait for a fill: the order's subsequent lifecycle is
/// observed via [`orders`].
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn place_order(auth: &AuthController, request: &OrderRequest) -> Result<OrderAck> {
    let payload = serde_json::to_value(request)
        .map_err(|err| brokerlink_core::Error::Validation(err.to_string()))?;
    subscribe_and_wait(
        auth,
        "simpleCreateOrder",
        Some(payload),
        validate::<OrderAck>,
        DEFAULT_TIMEOUT,
    )
    .await
}

/// Fetches a one-shot snapshot of all open and recent orders.
///
/// Callers who want live updates as orders fill should subscribe to the
/// `orders` topic directly via [`brokerlink_core::WebSocketManager`] instead
/// of calling this repeatedly; this helper is for a single current-state
/// read.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn orders(auth: &AuthController) -> Result<Vec<OrderStatus>> {
    let snapshot = subscribe_and_wait(
        auth,
        "orders",
        None,
        validate::<OrdersSnapshot>,
        DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(snapshot.orders)
}

/// Cancels a previously placed order.
#[tracing::instrument(level = "debug", skip(auth))]
pub async fn cancel_order(auth: &AuthController, order_id: &str) -> Result<CancelAck> {
    subscribe_and_wait(
        auth,
        "cancelOrder",
        Some(serde_json::json!({ "orderId": order_id })),
        validate::<CancelAck>,
        DEFAULT_TIMEOUT,
    )
    .await
}
