//! Order entity: idempotent on `client_order_id`, monotone towards a terminal status.

use super::fill::Fill;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Day
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Submitted
                | OrderStatus::Accepted
                | OrderStatus::PartiallyFilled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub run_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub filled_avg_price: f64,
    pub fills: Vec<Fill>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        client_order_id: String,
        run_id: String,
        symbol: String,
        side: Side,
        order_type: OrderType,
        qty: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        time_in_force: TimeInForce,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_order_id,
            exchange_order_id: None,
            run_id,
            symbol,
            side,
            order_type,
            qty,
            limit_price,
            stop_price,
            time_in_force,
            status: OrderStatus::Pending,
            filled_qty: 0.0,
            filled_avg_price: 0.0,
            fills: Vec::new(),
            created_at: now,
            submitted_at: None,
            filled_at: None,
            cancelled_at: None,
            reject_reason: None,
        }
    }

    /// Apply a fill, updating `filled_qty`, the weighted `filled_avg_price`, and status.
    /// Per the fill simulator's default (no partials), a fill always completes the order,
    /// but this is written to also support a future partial-fill producer without change.
    pub fn apply_fill(&mut self, fill: Fill, now: DateTime<Utc>) {
        let prior_notional = self.filled_avg_price * self.filled_qty;
        let fill_notional = fill.price * fill.qty;
        self.filled_qty += fill.qty;
        self.filled_avg_price = if self.filled_qty > 0.0 {
            (prior_notional + fill_notional) / self.filled_qty
        } else {
            0.0
        };
        self.fills.push(fill);

        if self.filled_qty >= self.qty {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(now);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
    }

    /// A `day` order that never got a fill by the end of the calendar day it was created on.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::Expired;
        self.cancelled_at = Some(now);
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
    }
}
