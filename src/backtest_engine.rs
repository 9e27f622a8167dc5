//! Backtest Engine: the per-run execution environment for `backtest` mode. Owns
//! positions, pending orders, and the equity curve; simulates fills via the Fill
//! Simulator against preloaded bars instead of any live adapter.
//!
//! Tick handling is split across two calls the Run Manager composes around the strategy's
//! own `on_tick`: `advance_to` updates the current-bar map, and `process_pending_orders`
//! drains, re-marks, and emits `data.WindowReady` afterwards. This ordering (rather than
//! doing all of it in one call) is what lets an order placed during this tick's strategy
//! reaction wait until the next tick to be eligible for a fill — see DESIGN.md.

use crate::bar_repository::BarRepository;
use crate::error::{WeaverError, WeaverResult};
use crate::event_log::{EventHandler, EventLog, EventType};
use crate::fill_simulator::FillSimulator;
use crate::model::envelope::EnvelopeDraft;
use crate::model::{
    Bar, Envelope, Fill, Order, OrderStatus, SimulatedPosition, StrategyAction, Timeframe, TimeInForce,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct BacktestStats {
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub final_equity: f64,
}

struct PendingFetch {
    symbol: String,
    timeframe: Timeframe,
    lookback: u32,
}

struct EngineState {
    orders: HashMap<String, Order>,
    client_order_index: HashMap<String, String>,
    stop_triggered: HashMap<String, bool>,
    pending_queue: VecDeque<String>,
    ready_to_drain: Vec<String>,
    fetch_queue: VecDeque<(u64, PendingFetch)>,
    ready_fetches: Vec<(u64, PendingFetch)>,
    positions: HashMap<String, SimulatedPosition>,
    current_bars: HashMap<String, Bar>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
    starting_cash: f64,
    cash: f64,
    next_order_seq: u64,
}

pub struct BacktestEngine {
    run_id: String,
    event_log: Arc<EventLog>,
    bar_repository: Arc<dyn BarRepository>,
    fill_sim: FillSimulator,
    timeframe: Timeframe,
    state: Mutex<EngineState>,
}

impl BacktestEngine {
    pub fn new(
        run_id: impl Into<String>,
        event_log: Arc<EventLog>,
        bar_repository: Arc<dyn BarRepository>,
        fill_sim: FillSimulator,
        timeframe: Timeframe,
        starting_cash: f64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            event_log,
            bar_repository,
            fill_sim,
            timeframe,
            state: Mutex::new(EngineState {
                orders: HashMap::new(),
                client_order_index: HashMap::new(),
                stop_triggered: HashMap::new(),
                pending_queue: VecDeque::new(),
                ready_to_drain: Vec::new(),
                fetch_queue: VecDeque::new(),
                ready_fetches: Vec::new(),
                positions: HashMap::new(),
                current_bars: HashMap::new(),
                equity_curve: Vec::new(),
                starting_cash,
                cash: starting_cash,
                next_order_seq: 0,
            }),
        }
    }

    /// Step 1 of a tick: load each symbol's bar at `ts`, snapshot the orders queued by
    /// prior ticks into `ready_to_drain`, and snapshot fetch requests the same way.
    pub async fn advance_to(&self, symbols: &[String], ts: DateTime<Utc>) {
        let mut state = self.state.lock();
        for symbol in symbols {
            match self
                .bar_repository
                .get_bar_at(symbol, self.timeframe, ts)
                .await
            {
                Ok(Some(bar)) => {
                    state.current_bars.insert(symbol.clone(), bar);
                }
                Ok(None) => {}
                Err(e) => warn!(run_id = %self.run_id, symbol, error = %e, "failed to load bar"),
            }
        }
        state.ready_to_drain = state.pending_queue.drain(..).collect();
        state.ready_fetches = state.fetch_queue.drain(..).collect();
    }

    /// Step 2: simulate fills for orders snapshotted at `advance_to`, re-mark positions
    /// against the current bars, record the equity curve point, and emit any
    /// `data.WindowReady` for fetches snapshotted the same way.
    pub async fn process_pending_orders(&self, ts: DateTime<Utc>) -> WeaverResult<()> {
        let (ready_orders, ready_fetches, current_bars) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.ready_to_drain),
                std::mem::take(&mut state.ready_fetches),
                state.current_bars.clone(),
            )
        };

        for order_id in ready_orders {
            self.try_fill_order(&order_id, &current_bars, ts).await?;
        }

        {
            let mut state = self.state.lock();
            for (symbol, bar) in &current_bars {
                let position = state
                    .positions
                    .entry(symbol.clone())
                    .or_insert_with(|| SimulatedPosition::flat(self.run_id.clone(), symbol.clone()));
                position.remark(bar.close);
            }
            let equity = state.cash
                + state
                    .positions
                    .values()
                    .map(|p| p.mark_value)
                    .sum::<f64>();
            state.equity_curve.push((ts, equity));
        }

        for (causation_offset, fetch) in ready_fetches {
            self.emit_window_ready(causation_offset, &fetch, ts).await?;
        }

        Ok(())
    }

    async fn emit_window_ready(
        &self,
        causation_offset: u64,
        fetch: &PendingFetch,
        ts: DateTime<Utc>,
    ) -> WeaverResult<()> {
        let period = chrono::Duration::seconds(fetch.timeframe.period_seconds() * fetch.lookback as i64);
        let bars = self
            .bar_repository
            .get_bars(&fetch.symbol, fetch.timeframe, ts - period, ts)
            .await?;
        let window = crate::model::DataWindow {
            symbol: fetch.symbol.clone(),
            timeframe: fetch.timeframe,
            bars,
        };
        let draft = EnvelopeDraft::new(
            EventType::DataWindowReady,
            "backtest_engine",
            Some(self.run_id.clone()),
            serde_json::to_value(&window).expect("DataWindow always serializes"),
        )
        .with_causation_id(causation_offset);
        self.event_log.append(draft).await?;
        Ok(())
    }

    async fn try_fill_order(
        &self,
        order_id: &str,
        current_bars: &HashMap<String, Bar>,
        ts: DateTime<Utc>,
    ) -> WeaverResult<()> {
        let Some(order) = self.state.lock().orders.get(order_id).cloned() else {
            return Ok(());
        };
        if order.status.is_terminal() {
            return Ok(());
        }

        let Some(bar) = current_bars.get(&order.symbol).cloned() else {
            return self.handle_no_fill(order_id, &order, ts).await;
        };

        let (order, mut triggered) = {
            let state = self.state.lock();
            let Some(order) = state.orders.get(order_id).cloned() else {
                return Ok(());
            };
            let triggered = *state.stop_triggered.get(order_id).unwrap_or(&false);
            (order, triggered)
        };

        let Some(sim_fill) = self.fill_sim.try_fill(&order, &bar, &mut triggered) else {
            self.state.lock().stop_triggered.insert(order_id.to_string(), triggered);
            return self.handle_no_fill(order_id, &order, ts).await;
        };

        let now = bar.timestamp;
        let fill = Fill {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            qty: sim_fill.qty,
            price: sim_fill.price,
            commission: sim_fill.commission,
            slippage: sim_fill.slippage,
            timestamp: now,
        };

        let event_type = {
            let mut state = self.state.lock();
            state.stop_triggered.insert(order_id.to_string(), triggered);
            let stored = state.orders.get_mut(order_id).expect("checked above");
            stored.apply_fill(fill.clone(), now);
            let signed_qty = match stored.side {
                crate::model::Side::Buy => sim_fill.qty,
                crate::model::Side::Sell => -sim_fill.qty,
            };
            let position = state
                .positions
                .entry(stored.symbol.clone())
                .or_insert_with(|| SimulatedPosition::flat(self.run_id.clone(), stored.symbol.clone()));
            position.apply_fill(signed_qty, sim_fill.price);
            let cash_delta = match stored.side {
                crate::model::Side::Buy => -(sim_fill.price * sim_fill.qty) - sim_fill.commission,
                crate::model::Side::Sell => sim_fill.price * sim_fill.qty - sim_fill.commission,
            };
            state.cash += cash_delta;
            stored.status
        };

        let payload = serde_json::json!({ "order_id": order_id, "fill": fill });
        let wire_type = match event_type {
            OrderStatus::Filled => EventType::OrdersFilled,
            _ => EventType::OrdersPartiallyFilled,
        };
        let draft = EnvelopeDraft::new(wire_type, "backtest_engine", Some(self.run_id.clone()), payload);
        self.event_log.append(draft).await?;
        Ok(())
    }

    /// An order that didn't fill this tick (no bar, or the fill simulator declined it) is
    /// resolved by time-in-force: `ioc`/`fok` never rest past the tick they were evaluated
    /// on, `day` rests until the calendar day it was created on ends, and `gtc` just goes
    /// back on the queue for the next tick.
    async fn handle_no_fill(&self, order_id: &str, order: &Order, ts: DateTime<Utc>) -> WeaverResult<()> {
        match order.time_in_force {
            TimeInForce::Ioc | TimeInForce::Fok => {
                let cancelled = {
                    let mut state = self.state.lock();
                    match state.orders.get_mut(order_id) {
                        Some(stored) if !stored.status.is_terminal() => {
                            stored.cancel(ts);
                            true
                        }
                        _ => false,
                    }
                };
                if cancelled {
                    let draft = EnvelopeDraft::new(
                        EventType::OrdersCancelled,
                        "backtest_engine",
                        Some(self.run_id.clone()),
                        serde_json::json!({ "order_id": order_id, "reason": "time_in_force_no_fill" }),
                    );
                    self.event_log.append(draft).await?;
                }
                Ok(())
            }
            TimeInForce::Day => {
                if ts.date_naive() != order.created_at.date_naive() {
                    let expired = {
                        let mut state = self.state.lock();
                        match state.orders.get_mut(order_id) {
                            Some(stored) if !stored.status.is_terminal() => {
                                stored.expire(ts);
                                true
                            }
                            _ => false,
                        }
                    };
                    if expired {
                        let draft = EnvelopeDraft::new(
                            EventType::OrdersExpired,
                            "backtest_engine",
                            Some(self.run_id.clone()),
                            serde_json::json!({ "order_id": order_id }),
                        );
                        self.event_log.append(draft).await?;
                    }
                } else {
                    self.requeue(order_id);
                }
                Ok(())
            }
            TimeInForce::Gtc => {
                self.requeue(order_id);
                Ok(())
            }
        }
    }

    fn requeue(&self, order_id: &str) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get(order_id) {
            if !order.status.is_terminal() {
                state.pending_queue.push_back(order_id.to_string());
            }
        }
    }

    pub fn stats(&self) -> BacktestStats {
        let state = self.state.lock();
        let curve = &state.equity_curve;
        if curve.len() < 2 {
            return BacktestStats {
                final_equity: curve.last().map(|(_, e)| *e).unwrap_or(state.starting_cash),
                ..Default::default()
            };
        }

        let returns: Vec<f64> = curve
            .windows(2)
            .map(|w| (w[1].1 - w[0].1) / w[0].1.max(1e-9))
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();
        let sharpe = if std_dev > 1e-12 { mean / std_dev } else { 0.0 };

        let downside: Vec<f64> = returns.iter().cloned().filter(|r| *r < 0.0).collect();
        let downside_dev = if downside.is_empty() {
            0.0
        } else {
            (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt()
        };
        let sortino = if downside_dev > 1e-12 { mean / downside_dev } else { 0.0 };

        let mut peak = curve[0].1;
        let mut max_drawdown = 0.0;
        for (_, equity) in curve {
            peak = peak.max(*equity);
            let drawdown = (peak - equity) / peak.max(1e-9);
            max_drawdown = max_drawdown.max(drawdown);
        }

        let fills: Vec<&Fill> = state.orders.values().flat_map(|o| o.fills.iter()).collect();
        let total_commission = fills.iter().map(|f| f.commission).sum();
        let total_slippage = fills.iter().map(|f| f.slippage).sum();

        let wins = returns.iter().filter(|r| **r > 0.0).count();
        let win_rate = if returns.is_empty() {
            0.0
        } else {
            wins as f64 / returns.len() as f64
        };
        let gross_profit: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let gross_loss: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
        let profit_factor = if gross_loss > 1e-12 {
            gross_profit / gross_loss
        } else {
            gross_profit
        };

        BacktestStats {
            sharpe,
            sortino,
            max_drawdown,
            win_rate,
            profit_factor,
            total_commission,
            total_slippage,
            final_equity: curve.last().map(|(_, e)| *e).unwrap_or(state.starting_cash),
        }
    }
}

#[async_trait]
impl EventHandler for BacktestEngine {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
        match envelope.event_type {
            EventType::BacktestPlaceOrder => {
                let action: StrategyAction = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| WeaverError::Internal(anyhow::anyhow!(e)))?;
                if let StrategyAction::PlaceOrder {
                    client_order_id,
                    symbol,
                    side,
                    order_type,
                    qty,
                    limit_price,
                    stop_price,
                    time_in_force,
                } = action
                {
                    let order_id = {
                        let mut state = self.state.lock();
                        if let Some(existing) = state.client_order_index.get(&client_order_id) {
                            return Ok(self.reannounce(existing.clone()).await?);
                        }
                        let seq = state.next_order_seq;
                        state.next_order_seq += 1;
                        let id = format!("{}-{}", self.run_id, seq);
                        let order = Order::new(
                            id.clone(),
                            client_order_id.clone(),
                            self.run_id.clone(),
                            symbol,
                            side,
                            order_type,
                            qty,
                            limit_price,
                            stop_price,
                            time_in_force,
                            Utc::now(),
                        );
                        state.orders.insert(id.clone(), order);
                        state.client_order_index.insert(client_order_id, id.clone());
                        state.pending_queue.push_back(id.clone());
                        id
                    };
                    let draft = EnvelopeDraft::new(
                        EventType::OrdersCreated,
                        "backtest_engine",
                        Some(self.run_id.clone()),
                        serde_json::json!({ "order_id": order_id }),
                    )
                    .with_causation_id(envelope.offset);
                    self.event_log.append(draft).await?;
                }
                Ok(())
            }
            EventType::BacktestCancelOrder => {
                let action: StrategyAction = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| WeaverError::Internal(anyhow::anyhow!(e)))?;
                if let StrategyAction::CancelOrder { client_order_id } = action {
                    let order_id = self
                        .state
                        .lock()
                        .client_order_index
                        .get(&client_order_id)
                        .cloned();
                    if let Some(order_id) = order_id {
                        let cancelled = {
                            let mut state = self.state.lock();
                            if let Some(order) = state.orders.get_mut(&order_id) {
                                if order.status.is_cancellable() {
                                    order.cancel(Utc::now());
                                    true
                                } else {
                                    false
                                }
                            } else {
                                false
                            }
                        };
                        if cancelled {
                            let draft = EnvelopeDraft::new(
                                EventType::OrdersCancelled,
                                "backtest_engine",
                                Some(self.run_id.clone()),
                                serde_json::json!({ "order_id": order_id }),
                            )
                            .with_causation_id(envelope.offset);
                            self.event_log.append(draft).await?;
                        }
                    }
                }
                Ok(())
            }
            EventType::BacktestFetchWindow => {
                if let Ok(payload) = serde_json::from_value::<serde_json::Value>(envelope.payload.clone()) {
                    let symbol = payload["symbol"].as_str().unwrap_or_default().to_string();
                    let timeframe: Timeframe = payload["timeframe"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(self.timeframe);
                    let lookback = payload["lookback"].as_u64().unwrap_or(1) as u32;
                    self.state.lock().fetch_queue.push_back((
                        envelope.offset,
                        PendingFetch {
                            symbol,
                            timeframe,
                            lookback,
                        },
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl BacktestEngine {
    async fn reannounce(&self, order_id: String) -> WeaverResult<()> {
        let draft = EnvelopeDraft::new(
            EventType::OrdersCreated,
            "backtest_engine",
            Some(self.run_id.clone()),
            serde_json::json!({ "order_id": order_id, "idempotent_replay": true }),
        );
        self.event_log.append(draft).await?;
        Ok(())
    }
}
