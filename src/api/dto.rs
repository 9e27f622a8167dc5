//! Request/response shapes for the HTTP surface. Kept separate from the core model so
//! that wire concerns (query strings, optional filters) don't leak into domain types.

use crate::model::{OrderType, Side, TimeInForce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub run_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub run_id: String,
    pub client_order_id: String,
}

#[derive(Debug, Serialize)]
pub struct OrderActionAccepted {
    pub accepted: bool,
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub run_id: String,
}

/// One order-lifecycle envelope, projected from the Event Log rather than a dedicated
/// order store: `orders.*` events are already the durable record.
#[derive(Debug, Serialize)]
pub struct OrderEvent {
    pub offset: u64,
    pub event_type: String,
    pub appended_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    pub symbol: String,
    /// Parsed with `Timeframe::from_str` rather than derived enum deserialization, since
    /// query strings hand every field to serde as a bare string.
    pub timeframe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct EventsStreamQuery {
    pub run_id: Option<String>,
}
