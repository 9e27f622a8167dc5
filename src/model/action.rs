//! Strategy actions: a closed tagged union. Not stringly typed — the tag and the
//! permitted fields per tag are part of the contract strategies are compiled against.

use super::bar::Timeframe;
use super::order::{OrderType, Side, TimeInForce};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyAction {
    FetchWindow {
        symbol: String,
        timeframe: Timeframe,
        lookback: u32,
    },
    PlaceOrder {
        client_order_id: String,
        symbol: String,
        side: Side,
        order_type: OrderType,
        qty: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        #[serde(default)]
        time_in_force: TimeInForce,
    },
    CancelOrder {
        client_order_id: String,
    },
}
