//! Live/paper order intake: the `live.*` counterpart to the Backtest Engine's order
//! handling, routing accepted intents to an `ExchangeAdapter` instead of simulating fills
//! in-process.

use crate::error::{WeaverError, WeaverResult};
use crate::event_log::{EventHandler, EventLog, EventType};
use crate::exchange::ExchangeAdapter;
use crate::model::envelope::EnvelopeDraft;
use crate::model::{Envelope, Order, OrderStatus, StrategyAction};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LiveOrderGateway {
    run_id: String,
    event_log: Arc<EventLog>,
    adapter: Arc<dyn ExchangeAdapter>,
    client_order_index: Mutex<HashMap<String, String>>,
    next_seq: Mutex<u64>,
}

impl LiveOrderGateway {
    pub fn new(run_id: impl Into<String>, event_log: Arc<EventLog>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            run_id: run_id.into(),
            event_log,
            adapter,
            client_order_index: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
        }
    }

    async fn handle_place(&self, envelope: &Envelope, action: StrategyAction) -> WeaverResult<()> {
        let StrategyAction::PlaceOrder {
            client_order_id,
            symbol,
            side,
            order_type,
            qty,
            limit_price,
            stop_price,
            time_in_force,
        } = action
        else {
            return Ok(());
        };

        if self.client_order_index.lock().contains_key(&client_order_id) {
            return Ok(());
        }

        let id = {
            let mut seq = self.next_seq.lock();
            let id = format!("{}-{}", self.run_id, *seq);
            *seq += 1;
            id
        };
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

        let result = self.adapter.submit_order(&order).await?;
        self.client_order_index
            .lock()
            .insert(client_order_id, result.exchange_order_id.clone());

        if !result.accepted {
            let draft = EnvelopeDraft::new(
                EventType::OrdersRejected,
                "live_order_gateway",
                Some(self.run_id.clone()),
                serde_json::json!({ "order_id": id, "reason": result.reject_reason }),
            )
            .with_causation_id(envelope.offset);
            self.event_log.append(draft).await?;
            return Ok(());
        }

        let draft = EnvelopeDraft::new(
            EventType::OrdersCreated,
            "live_order_gateway",
            Some(self.run_id.clone()),
            serde_json::json!({ "order_id": id, "exchange_order_id": result.exchange_order_id }),
        )
        .with_causation_id(envelope.offset);
        self.event_log.append(draft).await?;

        // Simulated/mock adapters fill synchronously inside `submit_order`; a real
        // exchange reports fills asynchronously and this branch simply won't fire until
        // a later reconciliation pass (not yet implemented) observes the terminal state.
        if let Some(fetched) = self.adapter.get_order(&result.exchange_order_id).await? {
            if fetched.status == OrderStatus::Filled {
                let draft = EnvelopeDraft::new(
                    EventType::OrdersFilled,
                    "live_order_gateway",
                    Some(self.run_id.clone()),
                    serde_json::json!({ "order_id": id, "fills": fetched.fills }),
                )
                .with_causation_id(envelope.offset);
                self.event_log.append(draft).await?;
            }
        }

        Ok(())
    }

    async fn handle_cancel(&self, envelope: &Envelope, action: StrategyAction) -> WeaverResult<()> {
        let StrategyAction::CancelOrder { client_order_id } = action else {
            return Ok(());
        };
        let Some(exchange_order_id) = self.client_order_index.lock().get(&client_order_id).cloned() else {
            return Ok(());
        };
        self.adapter.cancel_order(&exchange_order_id).await?;
        let draft = EnvelopeDraft::new(
            EventType::OrdersCancelled,
            "live_order_gateway",
            Some(self.run_id.clone()),
            serde_json::json!({ "exchange_order_id": exchange_order_id }),
        )
        .with_causation_id(envelope.offset);
        self.event_log.append(draft).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for LiveOrderGateway {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
        match envelope.event_type {
            EventType::LivePlaceOrder => {
                let action: StrategyAction = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| WeaverError::Internal(anyhow::anyhow!(e)))?;
                self.handle_place(envelope, action).await
            }
            EventType::LiveCancelOrder => {
                let action: StrategyAction = serde_json::from_value(envelope.payload.clone())
                    .map_err(|e| WeaverError::Internal(anyhow::anyhow!(e)))?;
                self.handle_cancel(envelope, action).await
            }
            _ => Ok(()),
        }
    }
}
