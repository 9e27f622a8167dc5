//! Strategy Runner: the sole bridge between a strategy's pure decision logic and the rest
//! of a run. Owned exclusively by one `RunContext`.

use super::Strategy;
use crate::clock::Tick;
use crate::error::WeaverResult;
use crate::event_log::{EventHandler, EventLog, Filter};
use crate::model::{envelope::EnvelopeDraft, DataWindow, Envelope, EventType, StrategyAction};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub struct StrategyRunner {
    run_id: String,
    event_log: Arc<EventLog>,
    strategy: Mutex<Box<dyn Strategy>>,
}

impl StrategyRunner {
    pub fn new(run_id: impl Into<String>, event_log: Arc<EventLog>, strategy: Box<dyn Strategy>) -> Self {
        Self {
            run_id: run_id.into(),
            event_log,
            strategy: Mutex::new(strategy),
        }
    }

    pub async fn initialize(&self, symbols: &[String], params: serde_json::Value) {
        self.strategy.lock().await.initialize(symbols, params);
    }

    /// Registers this runner to receive `data.WindowReady` for its run. Must be called
    /// before the clock starts emitting ticks.
    pub async fn subscribe_data(self: &Arc<Self>) {
        let filter = Filter {
            event_types: Some([EventType::DataWindowReady].into_iter().collect()),
            run_id: Some(self.run_id.clone()),
        };
        self.event_log.subscribe(filter, self.clone()).await;
    }

    async fn dispatch_actions(&self, actions: Vec<StrategyAction>, causation_id: Option<u64>) {
        for action in actions {
            let event_type = match &action {
                StrategyAction::FetchWindow { .. } => EventType::StrategyFetchWindow,
                StrategyAction::PlaceOrder { .. } => EventType::StrategyPlaceRequest,
                StrategyAction::CancelOrder { .. } => EventType::StrategyCancelRequest,
            };
            // The wire payload is always the full tagged `StrategyAction`, so the Domain
            // Router and the engine that ultimately consumes it can deserialize the same
            // shape regardless of which action produced it.
            let payload = serde_json::to_value(&action).expect("StrategyAction always serializes");

            let mut draft = EnvelopeDraft::new(event_type, "strategy_runner", Some(self.run_id.clone()), payload);
            if let Some(id) = causation_id {
                draft = draft.with_causation_id(id);
            }
            if let Err(e) = self.event_log.append(draft).await {
                warn!(run_id = %self.run_id, error = %e, "failed to append strategy action");
            }
        }
    }

    /// Invoked by the run's tick-processing handler, after `causation_offset`'s
    /// `clock.Tick` envelope has already been appended.
    pub async fn on_tick(&self, tick: Tick, causation_offset: u64) {
        let actions = self.strategy.lock().await.on_tick(tick);
        self.dispatch_actions(actions, Some(causation_offset)).await;
    }
}

#[async_trait]
impl EventHandler for StrategyRunner {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
        let window: DataWindow = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| crate::error::WeaverError::Internal(anyhow::anyhow!(e)))?;
        let actions = self.strategy.lock().await.on_data(window);
        self.dispatch_actions(actions, Some(envelope.offset)).await;
        Ok(())
    }
}
