//! Paper adapter: fills orders against the Bar Repository's latest bar using the same
//! Fill Simulator the Backtest Engine uses, so paper and backtest runs share fill logic.

use super::{AccountSnapshot, ExchangeAdapter, SubmitResult};
use crate::bar_repository::BarRepository;
use crate::error::{WeaverError, WeaverResult};
use crate::fill_simulator::FillSimulator;
use crate::model::{Bar, Order, OrderStatus, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct SimulatedAdapter {
    id: String,
    bar_repository: Arc<dyn BarRepository>,
    fill_sim: FillSimulator,
    connected: AtomicBool,
    orders: Mutex<HashMap<String, Order>>,
    client_order_index: Mutex<HashMap<String, String>>,
    cash: Mutex<f64>,
}

impl SimulatedAdapter {
    pub fn new(
        id: impl Into<String>,
        bar_repository: Arc<dyn BarRepository>,
        fill_sim: FillSimulator,
        starting_cash: f64,
    ) -> Self {
        Self {
            id: id.into(),
            bar_repository,
            fill_sim,
            connected: AtomicBool::new(false),
            orders: Mutex::new(HashMap::new()),
            client_order_index: Mutex::new(HashMap::new()),
            cash: Mutex::new(starting_cash),
        }
    }

    fn require_connected(&self) -> WeaverResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WeaverError::Connection(format!(
                "adapter {} is not connected",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedAdapter {
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
        self.require_connected()?;

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

        let now = Utc::now();
        let lookback_start = now - chrono::Duration::seconds(Timeframe::M1.period_seconds() * 2);
        let latest = self
            .bar_repository
            .get_bars(&order.symbol, Timeframe::M1, lookback_start, now)
            .await?
            .into_iter()
            .last();

        let mut stored = order.clone();
        let exchange_order_id = format!("sim-{}", order.id);
        stored.exchange_order_id = Some(exchange_order_id.clone());
        stored.status = OrderStatus::Accepted;

        if let Some(bar) = latest {
            let mut triggered = false;
            if let Some(fill) = self.fill_sim.try_fill(&stored, &bar, &mut triggered) {
                let now = Utc::now();
                stored.apply_fill(
                    crate::model::Fill {
                        id: uuid::Uuid::new_v4().to_string(),
                        order_id: stored.id.clone(),
                        qty: fill.qty,
                        price: fill.price,
                        commission: fill.commission,
                        slippage: fill.slippage,
                        timestamp: now,
                    },
                    now,
                );
                let mut cash = self.cash.lock();
                let signed = match stored.side {
                    crate::model::Side::Buy => -1.0,
                    crate::model::Side::Sell => 1.0,
                };
                *cash += signed * fill.price * fill.qty - fill.commission;
            }
        }

        self.orders
            .lock()
            .insert(exchange_order_id.clone(), stored);
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
        self.require_connected()?;
        let mut orders = self.orders.lock();
        match orders.get_mut(exchange_order_id) {
            Some(order) if order.status.is_cancellable() => {
                order.cancel(Utc::now());
                Ok(())
            }
            Some(_) => Err(WeaverError::Conflict(
                "order is no longer cancellable".into(),
            )),
            None => Err(WeaverError::NotFound(format!(
                "no such order {exchange_order_id}"
            ))),
        }
    }

    async fn get_order(&self, exchange_order_id: &str) -> WeaverResult<Option<Order>> {
        self.require_connected()?;
        Ok(self.orders.lock().get(exchange_order_id).cloned())
    }

    async fn list_open_orders(&self) -> WeaverResult<Vec<Order>> {
        self.require_connected()?;
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn account_snapshot(&self) -> WeaverResult<AccountSnapshot> {
        self.require_connected()?;
        let cash = *self.cash.lock();
        Ok(AccountSnapshot { cash, equity: cash })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>> {
        self.require_connected()?;
        self.bar_repository
            .get_bars(symbol, timeframe, since, until)
            .await
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(feature, "market" | "limit" | "stop" | "stop_limit")
    }
}
