//! Domain Router: the single place that knows how a mode-agnostic `strategy.*` intent
//! becomes a `backtest.*` or `live.*` domain event. A singleton shared across every run.

use crate::error::WeaverResult;
use crate::event_log::{EventHandler, EventLog, EventType};
use crate::model::envelope::EnvelopeDraft;
use crate::model::{Envelope, RunMode};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Tracks the mode of every live run so the router can translate without querying the
/// Run Manager on every event. Updated by the Run Manager on create/start/cleanup.
#[derive(Default)]
pub struct RunModeRegistry {
    modes: RwLock<HashMap<String, RunMode>>,
}

impl RunModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, run_id: impl Into<String>, mode: RunMode) {
        self.modes.write().insert(run_id.into(), mode);
    }

    pub fn get(&self, run_id: &str) -> Option<RunMode> {
        self.modes.read().get(run_id).copied()
    }

    pub fn remove(&self, run_id: &str) {
        self.modes.write().remove(run_id);
    }
}

pub struct DomainRouter {
    event_log: Arc<EventLog>,
    modes: Arc<RunModeRegistry>,
    // Causation-offset dedup: a strategy event is translated exactly once even if this
    // handler is ever invoked again for the same envelope (e.g. a future durable-consumer
    // replay path). In-memory only — sufficient for a single long-lived process.
    seen: Mutex<HashSet<u64>>,
}

impl DomainRouter {
    pub fn new(event_log: Arc<EventLog>, modes: Arc<RunModeRegistry>) -> Self {
        Self {
            event_log,
            modes,
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn target_event_type(source: EventType, mode: RunMode) -> Option<EventType> {
        use EventType::*;
        Some(match (source, mode) {
            (StrategyFetchWindow, RunMode::Backtest) => BacktestFetchWindow,
            (StrategyFetchWindow, RunMode::Paper | RunMode::Live) => LiveFetchWindow,
            (StrategyPlaceRequest, RunMode::Backtest) => BacktestPlaceOrder,
            (StrategyPlaceRequest, RunMode::Paper | RunMode::Live) => LivePlaceOrder,
            (StrategyCancelRequest, RunMode::Backtest) => BacktestCancelOrder,
            (StrategyCancelRequest, RunMode::Paper | RunMode::Live) => LiveCancelOrder,
            _ => return None,
        })
    }
}

#[async_trait]
impl EventHandler for DomainRouter {
    async fn handle(&self, envelope: &Envelope) -> WeaverResult<()> {
        if !envelope.event_type.is_strategy_intent() {
            return Ok(());
        }
        if !self.seen.lock().insert(envelope.offset) {
            return Ok(());
        }

        let Some(run_id) = envelope.run_id.clone() else {
            warn!(offset = envelope.offset, "strategy event with no run_id; dropping");
            return Ok(());
        };
        let Some(mode) = self.modes.get(&run_id) else {
            warn!(run_id, offset = envelope.offset, "no known mode for run; dropping strategy event");
            return Ok(());
        };
        let Some(target) = Self::target_event_type(envelope.event_type, mode) else {
            return Ok(());
        };

        let draft = EnvelopeDraft::new(target, "domain_router", Some(run_id), envelope.payload.clone())
            .with_causation_id(envelope.offset);
        self.event_log.append(draft).await?;
        Ok(())
    }
}
