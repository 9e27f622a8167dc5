//! Exchange Adapter: the port between a run and an external (or simulated) venue.
//!
//! A backtest run never touches an adapter — the Backtest Engine simulates fills directly
//! against preloaded bars. Paper and live runs route every order and market data request
//! through one of these.

pub mod live;
pub mod mock;
pub mod plugin_loader;
pub mod simulated;

use crate::error::WeaverResult;
use crate::model::{Bar, Order, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub exchange_order_id: String,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
}

/// Adapters own their own connection lifecycle. `connect` must succeed before any other
/// method is called; implementations that receive a call while disconnected return
/// `WeaverError::Connection`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn id(&self) -> &str;

    async fn connect(&self) -> WeaverResult<()>;

    async fn disconnect(&self) -> WeaverResult<()>;

    fn is_connected(&self) -> bool;

    /// Idempotent by `order.client_order_id`: resubmitting an order the adapter has
    /// already seen returns the original result rather than placing a duplicate.
    async fn submit_order(&self, order: &Order) -> WeaverResult<SubmitResult>;

    async fn cancel_order(&self, exchange_order_id: &str) -> WeaverResult<()>;

    async fn get_order(&self, exchange_order_id: &str) -> WeaverResult<Option<Order>>;

    async fn list_open_orders(&self) -> WeaverResult<Vec<Order>>;

    async fn account_snapshot(&self) -> WeaverResult<AccountSnapshot>;

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>>;

    fn supports_feature(&self, feature: &str) -> bool;
}
