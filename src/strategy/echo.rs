//! A minimal reference strategy: buys a fixed quantity of its first symbol on a
//! configured tick index, once. Used by integration tests as a known-good fixture.

use super::Strategy;
use crate::clock::Tick;
use crate::model::{DataWindow, OrderType, Side, StrategyAction, TimeInForce};

pub struct EchoBuyAtTick {
    symbol: String,
    buy_at_bar_index: u64,
    qty: f64,
    placed: bool,
}

impl EchoBuyAtTick {
    pub fn new() -> Self {
        Self {
            symbol: String::new(),
            buy_at_bar_index: 2,
            qty: 1.0,
            placed: false,
        }
    }
}

impl Default for EchoBuyAtTick {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for EchoBuyAtTick {
    fn id(&self) -> &str {
        "echo_buy_at_tick"
    }

    fn initialize(&mut self, symbols: &[String], params: serde_json::Value) {
        self.symbol = symbols.first().cloned().unwrap_or_default();
        if let Some(idx) = params.get("buy_at_bar_index").and_then(|v| v.as_u64()) {
            self.buy_at_bar_index = idx;
        }
        if let Some(qty) = params.get("qty").and_then(|v| v.as_f64()) {
            self.qty = qty;
        }
    }

    fn on_tick(&mut self, tick: Tick) -> Vec<StrategyAction> {
        if self.placed || tick.bar_index != self.buy_at_bar_index {
            return Vec::new();
        }
        self.placed = true;
        vec![StrategyAction::PlaceOrder {
            client_order_id: format!("echo-{}", tick.bar_index),
            symbol: self.symbol.clone(),
            side: Side::Buy,
            order_type: OrderType::Market,
            qty: self.qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }]
    }

    fn on_data(&mut self, _window: DataWindow) -> Vec<StrategyAction> {
        Vec::new()
    }
}
