//! The Event Envelope: the unit flowing through the Event Log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of event types the core emits or consumes.
///
/// The wire representation is a dotted string (`orders.Created`, etc.) so that SQLite
/// storage and the SSE `event:` field never need a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    RunCreated,
    RunStarted,
    RunStopped,
    RunCompleted,
    RunError,
    ClockTick,
    StrategyFetchWindow,
    StrategyPlaceRequest,
    StrategyCancelRequest,
    BacktestFetchWindow,
    BacktestPlaceOrder,
    BacktestCancelOrder,
    LiveFetchWindow,
    LivePlaceOrder,
    LiveCancelOrder,
    DataWindowReady,
    OrdersCreated,
    OrdersSubmitted,
    OrdersAccepted,
    OrdersPartiallyFilled,
    OrdersFilled,
    OrdersCancelled,
    OrdersRejected,
    OrdersExpired,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunCreated => "run.Created",
            EventType::RunStarted => "run.Started",
            EventType::RunStopped => "run.Stopped",
            EventType::RunCompleted => "run.Completed",
            EventType::RunError => "run.Error",
            EventType::ClockTick => "clock.Tick",
            EventType::StrategyFetchWindow => "strategy.FetchWindow",
            EventType::StrategyPlaceRequest => "strategy.PlaceRequest",
            EventType::StrategyCancelRequest => "strategy.CancelRequest",
            EventType::BacktestFetchWindow => "backtest.FetchWindow",
            EventType::BacktestPlaceOrder => "backtest.PlaceOrder",
            EventType::BacktestCancelOrder => "backtest.CancelOrder",
            EventType::LiveFetchWindow => "live.FetchWindow",
            EventType::LivePlaceOrder => "live.PlaceOrder",
            EventType::LiveCancelOrder => "live.CancelOrder",
            EventType::DataWindowReady => "data.WindowReady",
            EventType::OrdersCreated => "orders.Created",
            EventType::OrdersSubmitted => "orders.Submitted",
            EventType::OrdersAccepted => "orders.Accepted",
            EventType::OrdersPartiallyFilled => "orders.PartiallyFilled",
            EventType::OrdersFilled => "orders.Filled",
            EventType::OrdersCancelled => "orders.Cancelled",
            EventType::OrdersRejected => "orders.Rejected",
            EventType::OrdersExpired => "orders.Expired",
        }
    }

    /// The `strategy.*` event this translates from, if this is a `backtest.*`/`live.*`
    /// domain event produced by the Domain Router.
    pub fn strategy_counterpart(&self) -> Option<EventType> {
        match self {
            EventType::BacktestFetchWindow | EventType::LiveFetchWindow => {
                Some(EventType::StrategyFetchWindow)
            }
            EventType::BacktestPlaceOrder | EventType::LivePlaceOrder => {
                Some(EventType::StrategyPlaceRequest)
            }
            EventType::BacktestCancelOrder | EventType::LiveCancelOrder => {
                Some(EventType::StrategyCancelRequest)
            }
            _ => None,
        }
    }

    pub fn is_strategy_intent(&self) -> bool {
        matches!(
            self,
            EventType::StrategyFetchWindow
                | EventType::StrategyPlaceRequest
                | EventType::StrategyCancelRequest
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct ParseEventTypeError(pub String);

impl std::str::FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "run.Created" => EventType::RunCreated,
            "run.Started" => EventType::RunStarted,
            "run.Stopped" => EventType::RunStopped,
            "run.Completed" => EventType::RunCompleted,
            "run.Error" => EventType::RunError,
            "clock.Tick" => EventType::ClockTick,
            "strategy.FetchWindow" => EventType::StrategyFetchWindow,
            "strategy.PlaceRequest" => EventType::StrategyPlaceRequest,
            "strategy.CancelRequest" => EventType::StrategyCancelRequest,
            "backtest.FetchWindow" => EventType::BacktestFetchWindow,
            "backtest.PlaceOrder" => EventType::BacktestPlaceOrder,
            "backtest.CancelOrder" => EventType::BacktestCancelOrder,
            "live.FetchWindow" => EventType::LiveFetchWindow,
            "live.PlaceOrder" => EventType::LivePlaceOrder,
            "live.CancelOrder" => EventType::LiveCancelOrder,
            "data.WindowReady" => EventType::DataWindowReady,
            "orders.Created" => EventType::OrdersCreated,
            "orders.Submitted" => EventType::OrdersSubmitted,
            "orders.Accepted" => EventType::OrdersAccepted,
            "orders.PartiallyFilled" => EventType::OrdersPartiallyFilled,
            "orders.Filled" => EventType::OrdersFilled,
            "orders.Cancelled" => EventType::OrdersCancelled,
            "orders.Rejected" => EventType::OrdersRejected,
            "orders.Expired" => EventType::OrdersExpired,
            other => return Err(ParseEventTypeError(other.to_string())),
        })
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An immutable, durably-ordered unit of the Event Log.
///
/// Offsets are assigned by the log at append time and are dense and monotonically
/// increasing; everything else is set by the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub offset: u64,
    pub event_type: EventType,
    pub appended_at: DateTime<Utc>,
    pub producer_id: String,
    pub run_id: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    pub causation_id: Option<u64>,
}

/// Everything about an envelope except the offset and append timestamp, which only the
/// log itself may assign.
#[derive(Debug, Clone)]
pub struct EnvelopeDraft {
    pub event_type: EventType,
    pub producer_id: String,
    pub run_id: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    pub causation_id: Option<u64>,
}

impl EnvelopeDraft {
    pub fn new(
        event_type: EventType,
        producer_id: impl Into<String>,
        run_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            producer_id: producer_id.into(),
            run_id,
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            causation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_causation_id(mut self, causation_id: u64) -> Self {
        self.causation_id = Some(causation_id);
        self
    }
}
