//! Mock adapter: deterministic, in-memory, used by integration tests that exercise the
//! live code path without a network dependency.

use super::{AccountSnapshot, ExchangeAdapter, SubmitResult};
use crate::error::{WeaverError, WeaverResult};
use crate::model::{Bar, Order, OrderStatus, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Every submitted order is accepted and immediately filled at `fixed_fill_price`.
pub struct MockAdapter {
    id: String,
    fixed_fill_price: f64,
    connected: AtomicBool,
    orders: Mutex<HashMap<String, Order>>,
    client_order_index: Mutex<HashMap<String, String>>,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>, fixed_fill_price: f64) -> Self {
        Self {
            id: id.into(),
            fixed_fill_price,
            connected: AtomicBool::new(false),
            orders: Mutex::new(HashMap::new()),
            client_order_index: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> WeaverResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> WeaverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, order: &Order) -> WeaverResult<SubmitResult> {
        if !self.is_connected() {
            return Err(WeaverError::Connection("mock adapter not connected".into()));
        }
        if let Some(existing_id) = self
            .client_order_index
            .lock()
            .get(&order.client_order_id)
            .cloned()
        {
            return Ok(SubmitResult {
                exchange_order_id: existing_id,
                accepted: true,
                reject_reason: None,
            });
        }

        let mut stored = order.clone();
        let exchange_order_id = format!("mock-{}", order.id);
        stored.exchange_order_id = Some(exchange_order_id.clone());
        let now = Utc::now();
        stored.apply_fill(
            crate::model::Fill {
                id: uuid::Uuid::new_v4().to_string(),
                order_id: stored.id.clone(),
                qty: stored.qty,
                price: self.fixed_fill_price,
                commission: 0.0,
                slippage: 0.0,
                timestamp: now,
            },
            now,
        );

        self.orders.lock().insert(exchange_order_id.clone(), stored);
        self.client_order_index
            .lock()
            .insert(order.client_order_id.clone(), exchange_order_id.clone());

        Ok(SubmitResult {
            exchange_order_id,
            accepted: true,
            reject_reason: None,
        })
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> WeaverResult<()> {
        let mut orders = self.orders.lock();
        match orders.get_mut(exchange_order_id) {
            Some(order) => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            None => Err(WeaverError::NotFound(format!(
                "no such order {exchange_order_id}"
            ))),
        }
    }

    async fn get_order(&self, exchange_order_id: &str) -> WeaverResult<Option<Order>> {
        Ok(self.orders.lock().get(exchange_order_id).cloned())
    }

    async fn list_open_orders(&self) -> WeaverResult<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn account_snapshot(&self) -> WeaverResult<AccountSnapshot> {
        Ok(AccountSnapshot {
            cash: 100_000.0,
            equity: 100_000.0,
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>> {
        Ok(vec![Bar {
            symbol: symbol.to_string(),
            timeframe,
            timestamp: since,
            open: self.fixed_fill_price,
            high: self.fixed_fill_price,
            low: self.fixed_fill_price,
            close: self.fixed_fill_price,
            volume: 0.0,
        }])
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(feature, "market")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderType, Side, TimeInForce};

    fn order() -> Order {
        Order::new(
            "o1".into(),
            "c1".into(),
            "r1".into(),
            "BTC/USD".into(),
            Side::Buy,
            OrderType::Market,
            1.0,
            None,
            None,
            TimeInForce::Day,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn resubmitting_same_client_order_id_is_idempotent() {
        let adapter = MockAdapter::new("mock", 100.0);
        adapter.connect().await.unwrap();
        let o = order();
        let r1 = adapter.submit_order(&o).await.unwrap();
        let r2 = adapter.submit_order(&o).await.unwrap();
        assert_eq!(r1.exchange_order_id, r2.exchange_order_id);
    }

    #[tokio::test]
    async fn calling_before_connect_errors() {
        let adapter = MockAdapter::new("mock", 100.0);
        let result = adapter.submit_order(&order()).await;
        assert!(result.is_err());
    }
}
