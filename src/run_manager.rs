//! Run Manager: owns the lifecycle of every run. Shared singleton; the only component
//! that constructs and tears down a `RunContext`.

use crate::backtest_engine::{BacktestEngine, BacktestStats};
use crate::bar_repository::BarRepository;
use crate::clock::{BacktestClock, Clock, RealtimeClock, Tick, TickHandler};
use crate::config::Config;
use crate::domain_router::{DomainRouter, RunModeRegistry};
use crate::error::{WeaverError, WeaverResult};
use crate::event_log::{EventLog, EventType, Filter, SubscriptionHandle};
use crate::exchange::live::{LiveAdapter, LiveCredentials};
use crate::exchange::simulated::SimulatedAdapter;
use crate::exchange::ExchangeAdapter;
use crate::fill_simulator::{FillSimConfig, FillSimulator};
use crate::live_order_gateway::LiveOrderGateway;
use crate::model::envelope::EnvelopeDraft;
use crate::model::{CreateRunRequest, Run, RunMode, RunStatus};
use crate::strategy::loader::StrategyLoader;
use crate::strategy::runner::StrategyRunner;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

struct RunTickHandler {
    run_id: String,
    event_log: Arc<EventLog>,
    strategy_runner: Arc<StrategyRunner>,
    backtest_engine: Option<Arc<BacktestEngine>>,
    symbols: Vec<String>,
}

#[async_trait]
impl TickHandler for RunTickHandler {
    async fn on_tick(&self, tick: Tick) {
        let draft = EnvelopeDraft::new(
            EventType::ClockTick,
            "run_manager",
            Some(self.run_id.clone()),
            serde_json::json!({ "bar_index": tick.bar_index, "timestamp": tick.timestamp }),
        );
        let causation_offset = match self.event_log.append(draft).await {
            Ok(envelope) => envelope.offset,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "failed to append clock.Tick");
                return;
            }
        };

        if let Some(engine) = &self.backtest_engine {
            engine.advance_to(&self.symbols, tick.timestamp).await;
        }

        self.strategy_runner.on_tick(tick, causation_offset).await;

        if let Some(engine) = &self.backtest_engine {
            if let Err(e) = engine.process_pending_orders(tick.timestamp).await {
                error!(run_id = %self.run_id, error = %e, "error processing pending orders");
            }
        }
    }
}

struct RunContext {
    clock: Arc<dyn Clock>,
    stop_requested: Arc<AtomicBool>,
    clock_task: tokio::task::JoinHandle<()>,
    subscriptions: Vec<SubscriptionHandle>,
}

pub struct RunManager {
    event_log: Arc<EventLog>,
    bar_repository: Arc<dyn BarRepository>,
    strategy_loader: Arc<StrategyLoader>,
    mode_registry: Arc<RunModeRegistry>,
    config: Arc<Config>,
    runs: RwLock<HashMap<String, Run>>,
    stats: RwLock<HashMap<String, BacktestStats>>,
    contexts: AsyncMutex<HashMap<String, RunContext>>,
}

impl RunManager {
    pub async fn new(
        event_log: Arc<EventLog>,
        bar_repository: Arc<dyn BarRepository>,
        strategy_loader: Arc<StrategyLoader>,
        config: Arc<Config>,
    ) -> WeaverResult<Arc<Self>> {
        let mode_registry = Arc::new(RunModeRegistry::new());
        let manager = Arc::new(Self {
            event_log: event_log.clone(),
            bar_repository,
            strategy_loader,
            mode_registry: mode_registry.clone(),
            config,
            runs: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            contexts: AsyncMutex::new(HashMap::new()),
        });

        let router = Arc::new(DomainRouter::new(event_log.clone(), mode_registry));
        event_log
            .subscribe(
                Filter::for_types([
                    EventType::StrategyFetchWindow,
                    EventType::StrategyPlaceRequest,
                    EventType::StrategyCancelRequest,
                ]),
                router,
            )
            .await;

        manager.recover_stale_runs().await;
        Ok(manager)
    }

    /// Any run still `Running` when the manager starts up did not shut down cleanly
    /// (no in-memory `RunContext` survives a process restart). It moves straight to
    /// `Error` rather than silently resuming — half-built run state is not resumable.
    async fn recover_stale_runs(&self) {
        let stale: Vec<String> = self
            .runs
            .read()
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.id.clone())
            .collect();
        for run_id in stale {
            warn!(run_id, "found run still Running at startup; marking Error");
            self.mark_error(&run_id, "run was still running when the process restarted")
                .await;
        }
    }

    pub fn list_runs(&self) -> Vec<Run> {
        self.runs.read().values().cloned().collect()
    }

    pub fn get_run(&self, run_id: &str) -> WeaverResult<Run> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| WeaverError::NotFound(format!("no such run {run_id}")))
    }

    pub fn get_stats(&self, run_id: &str) -> Option<BacktestStats> {
        self.stats.read().get(run_id).cloned()
    }

    pub async fn create_run(&self, req: CreateRunRequest) -> WeaverResult<Run> {
        req.validate()?;
        let id = Uuid::new_v4().to_string();
        let run = Run::new(id.clone(), req, Utc::now());
        self.runs.write().insert(id.clone(), run.clone());
        let draft = EnvelopeDraft::new(
            EventType::RunCreated,
            "run_manager",
            Some(id),
            serde_json::to_value(&run).expect("Run always serializes"),
        );
        self.event_log.append(draft).await?;
        Ok(run)
    }

    pub async fn delete_run(&self, run_id: &str) -> WeaverResult<()> {
        let run = self.get_run(run_id)?;
        if !run.status.is_terminal() && run.status != RunStatus::Pending {
            return Err(WeaverError::Conflict(format!(
                "run {run_id} must be stopped before it can be deleted"
            )));
        }
        self.teardown_context(run_id).await;
        self.runs.write().remove(run_id);
        self.stats.write().remove(run_id);
        self.mode_registry.remove(run_id);
        Ok(())
    }

    pub async fn start_run(self: &Arc<Self>, run_id: &str) -> WeaverResult<()> {
        let mut run = self.get_run(run_id)?;
        if run.status != RunStatus::Pending {
            return Err(WeaverError::RunNotStartable(run_id.to_string()));
        }

        self.mode_registry.set(run_id, run.mode);

        let strategy = self.strategy_loader.load(&run.strategy_id)?;
        let strategy_runner = Arc::new(StrategyRunner::new(run_id, self.event_log.clone(), strategy));
        strategy_runner
            .initialize(&run.symbols, serde_json::Value::Null)
            .await;
        strategy_runner.subscribe_data().await;

        let mut subscriptions = Vec::new();
        let backtest_engine = if run.mode.is_backtest() {
            let fill_sim = FillSimulator::new(FillSimConfig {
                slippage_bps: self.config.slippage_bps,
                commission_bps: self.config.commission_bps,
                commission_floor: self.config.commission_floor,
                ..Default::default()
            });
            let engine = Arc::new(BacktestEngine::new(
                run_id,
                self.event_log.clone(),
                self.bar_repository.clone(),
                fill_sim,
                run.timeframe,
                100_000.0,
            ));
            let handle = self
                .event_log
                .subscribe(
                    Filter {
                        event_types: Some(
                            [
                                EventType::BacktestFetchWindow,
                                EventType::BacktestPlaceOrder,
                                EventType::BacktestCancelOrder,
                            ]
                            .into_iter()
                            .collect(),
                        ),
                        run_id: Some(run_id.to_string()),
                    },
                    engine.clone(),
                )
                .await;
            subscriptions.push(handle);
            Some(engine)
        } else {
            let adapter: Arc<dyn ExchangeAdapter> = match run.mode {
                RunMode::Paper => Arc::new(SimulatedAdapter::new(
                    "simulated",
                    self.bar_repository.clone(),
                    FillSimulator::new(FillSimConfig {
                        slippage_bps: self.config.slippage_bps,
                        commission_bps: self.config.commission_bps,
                        commission_floor: self.config.commission_floor,
                        ..Default::default()
                    }),
                    100_000.0,
                )),
                RunMode::Live => {
                    let creds = self.config.live_exchange_credentials().ok_or_else(|| {
                        WeaverError::Validation(
                            "WEAVER_EXCHANGE_CREDENTIALS_LIVE is not set or not valid JSON".into(),
                        )
                    })?;
                    Arc::new(LiveAdapter::new(
                        "live",
                        creds.base_url.clone(),
                        LiveCredentials {
                            api_key: creds.api_key,
                            api_secret: creds.api_secret,
                        },
                    ))
                }
                RunMode::Backtest => unreachable!("handled above"),
            };
            adapter.connect().await?;
            let gateway = Arc::new(LiveOrderGateway::new(run_id, self.event_log.clone(), adapter));
            let handle = self
                .event_log
                .subscribe(
                    Filter {
                        event_types: Some(
                            [EventType::LivePlaceOrder, EventType::LiveCancelOrder]
                                .into_iter()
                                .collect(),
                        ),
                        run_id: Some(run_id.to_string()),
                    },
                    gateway,
                )
                .await;
            subscriptions.push(handle);
            None
        };

        let handler: Arc<dyn TickHandler> = Arc::new(RunTickHandler {
            run_id: run_id.to_string(),
            event_log: self.event_log.clone(),
            strategy_runner,
            backtest_engine: backtest_engine.clone(),
            symbols: run.symbols.clone(),
        });

        let clock: Arc<dyn Clock> = if run.mode.is_backtest() {
            let start = run.start_time.expect("validated at create_run");
            let end = run.end_time.expect("validated at create_run");
            Arc::new(BacktestClock::new(start, end, run.timeframe))
        } else {
            Arc::new(RealtimeClock::new(run.timeframe))
        };

        let stop_requested = Arc::new(AtomicBool::new(false));
        let manager = self.clone();
        let run_id_owned = run_id.to_string();
        let clock_for_task = clock.clone();
        let stop_for_task = stop_requested.clone();
        let clock_task = tokio::spawn(async move {
            clock_for_task.run(run_id_owned.clone(), handler).await;
            let engine_stats = backtest_engine.as_ref().map(|e| e.stats());
            manager
                .finish_run(&run_id_owned, stop_for_task.load(Ordering::SeqCst), engine_stats)
                .await;
        });

        self.contexts.lock().await.insert(
            run_id.to_string(),
            RunContext {
                clock,
                stop_requested,
                clock_task,
                subscriptions,
            },
        );

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.runs.write().insert(run_id.to_string(), run);
        metrics::gauge!("weaver_runs_active").increment(1.0);
        let draft = EnvelopeDraft::new(
            EventType::RunStarted,
            "run_manager",
            Some(run_id.to_string()),
            serde_json::json!({}),
        );
        self.event_log.append(draft).await?;
        info!(run_id, "run started");
        Ok(())
    }

    pub async fn stop_run(&self, run_id: &str) -> WeaverResult<()> {
        let run = self.get_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(WeaverError::RunNotStoppable(run_id.to_string()));
        }
        let contexts = self.contexts.lock().await;
        if let Some(ctx) = contexts.get(run_id) {
            ctx.stop_requested.store(true, Ordering::SeqCst);
            ctx.clock.stop();
        }
        Ok(())
    }

    /// Invoked from the clock task after `clock.run` returns, whether that was a natural
    /// backtest completion or an explicit `stop_run`.
    async fn finish_run(&self, run_id: &str, was_stopped: bool, stats: Option<BacktestStats>) {
        metrics::gauge!("weaver_runs_active").decrement(1.0);
        if let Some(stats) = stats {
            self.stats.write().insert(run_id.to_string(), stats);
        }
        let status = if was_stopped {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        let now = Utc::now();
        if let Some(run) = self.runs.write().get_mut(run_id) {
            run.status = status;
            match status {
                RunStatus::Stopped => run.stopped_at = Some(now),
                RunStatus::Completed => run.completed_at = Some(now),
                _ => {}
            }
        }
        let event_type = match status {
            RunStatus::Stopped => EventType::RunStopped,
            _ => EventType::RunCompleted,
        };
        let draft = EnvelopeDraft::new(event_type, "run_manager", Some(run_id.to_string()), serde_json::json!({}));
        if let Err(e) = self.event_log.append(draft).await {
            error!(run_id, error = %e, "failed to append run completion event");
        }
        self.teardown_context(run_id).await;
    }

    /// Called from the shutdown path: every run still `Running` is moved to `Error`
    /// rather than `Stopped`, since the process is exiting rather than the operator
    /// choosing to stop the run. `stop_requested` is set first so each run's clock task
    /// observes it and exits its loop at the next tick boundary instead of being aborted
    /// mid-tick.
    pub async fn shutdown(&self) {
        let running: Vec<String> = self
            .runs
            .read()
            .values()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.id.clone())
            .collect();
        for run_id in &running {
            if let Some(ctx) = self.contexts.lock().await.get(run_id) {
                ctx.stop_requested.store(true, Ordering::SeqCst);
                ctx.clock.stop();
            }
        }
        // Give each clock task a bounded window to observe the stop request and run its
        // own `finish_run` (recorded as `Stopped`) before this forces `Error` on whatever
        // hasn't wound down in time.
        for _ in 0..25 {
            let all_terminal = running.iter().all(|id| {
                self.runs
                    .read()
                    .get(id)
                    .map(|r| r.status.is_terminal())
                    .unwrap_or(true)
            });
            if all_terminal {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        for run_id in &running {
            let still_running = self
                .runs
                .read()
                .get(run_id)
                .map(|r| r.status == RunStatus::Running)
                .unwrap_or(false);
            if still_running {
                self.mark_error(run_id, "process shutting down").await;
            }
        }
    }

    async fn mark_error(&self, run_id: &str, message: &str) {
        if self
            .runs
            .read()
            .get(run_id)
            .map(|r| r.status == RunStatus::Running)
            .unwrap_or(false)
        {
            metrics::gauge!("weaver_runs_active").decrement(1.0);
        }
        if let Some(run) = self.runs.write().get_mut(run_id) {
            run.status = RunStatus::Error;
            run.error_message = Some(message.to_string());
        }
        let draft = EnvelopeDraft::new(
            EventType::RunError,
            "run_manager",
            Some(run_id.to_string()),
            serde_json::json!({ "message": message }),
        );
        let _ = self.event_log.append(draft).await;
        self.teardown_context(run_id).await;
    }

    async fn teardown_context(&self, run_id: &str) {
        let mut contexts = self.contexts.lock().await;
        if let Some(ctx) = contexts.remove(run_id) {
            for handle in ctx.subscriptions {
                self.event_log.unsubscribe(handle).await;
            }
            ctx.clock_task.abort();
        }
    }
}
