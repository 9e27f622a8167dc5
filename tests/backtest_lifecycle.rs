//! End-to-end lifecycle tests driving the Run Manager directly, without going through
//! HTTP. Mirrors how the control plane itself drives a run: create, start, poll to
//! completion, read results back out of the Event Log.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use weaver::bar_repository::{BarRepository, InMemoryBarRepository};
use weaver::config::Config;
use weaver::event_log::memory::InMemoryEventStore;
use weaver::event_log::{EventLog, EventStore, EventType, QueryFilter};
use weaver::model::{Bar, CreateRunRequest, RunMode, RunStatus, Timeframe};
use weaver::run_manager::RunManager;
use weaver::strategy::loader::StrategyLoader;

const SYMBOL: &str = "BTC/USD";

fn test_config() -> Config {
    Config {
        storage_url: "memory://".into(),
        host: "127.0.0.1".into(),
        port: 0,
        default_timeframe: Timeframe::M1,
        slippage_bps: 1.0,
        commission_bps: 2.0,
        commission_floor: 0.0,
        heartbeat_interval: Duration::from_secs(30),
        sse_channel_capacity: 64,
        exchange_credentials_paper: None,
        exchange_credentials_live: None,
        plugin_dir_strategies: "plugins/strategies".into(),
        plugin_dir_adapters: "plugins/adapters".into(),
    }
}

async fn seed_bars(repo: &InMemoryBarRepository, start: DateTime<Utc>, count: i64, base_price: f64) {
    let mut bars = Vec::new();
    for i in 0..count {
        let ts = start + chrono::Duration::minutes(i);
        let close = base_price + i as f64;
        bars.push(Bar {
            symbol: SYMBOL.to_string(),
            timeframe: Timeframe::M1,
            timestamp: ts,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 10.0,
        });
    }
    repo.save_bars(bars).await.unwrap();
}

async fn new_manager(event_log: Arc<EventLog>) -> (Arc<RunManager>, Arc<InMemoryBarRepository>) {
    let bar_repo = Arc::new(InMemoryBarRepository::new());
    let strategy_loader = Arc::new(StrategyLoader::new(test_config().plugin_dir_strategies));
    let manager = RunManager::new(
        event_log,
        bar_repo.clone() as Arc<dyn BarRepository>,
        strategy_loader,
        Arc::new(test_config()),
    )
    .await
    .unwrap();
    (manager, bar_repo)
}

async fn wait_for_terminal(manager: &RunManager, run_id: &str) -> RunStatus {
    for _ in 0..200 {
        let run = manager.get_run(run_id).unwrap();
        if run.status.is_terminal() {
            return run.status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} did not reach a terminal status in time");
}

#[tokio::test]
async fn backtest_run_fills_echo_strategy_order() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let event_log = Arc::new(EventLog::new(store, "test").await.unwrap());
    let (manager, bar_repo) = new_manager(event_log.clone()).await;

    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(6);
    seed_bars(&bar_repo, start, 6, 100.0).await;

    let run = manager
        .create_run(CreateRunRequest {
            strategy_id: "echo_buy_at_tick".to_string(),
            mode: RunMode::Backtest,
            symbols: vec![SYMBOL.to_string()],
            timeframe: Timeframe::M1,
            start_time: Some(start),
            end_time: Some(end),
        })
        .await
        .unwrap();

    manager.start_run(&run.id).await.unwrap();
    let status = wait_for_terminal(&manager, &run.id).await;
    assert_eq!(status, RunStatus::Completed);

    let stats = manager.get_stats(&run.id).expect("backtest stats recorded");
    assert!(
        stats.final_equity != 100_000.0,
        "equity should move once the echo strategy's order fills"
    );

    let fills = event_log
        .query(QueryFilter {
            types: vec![EventType::OrdersFilled],
            run_id: Some(run.id.clone()),
            since: None,
            until: None,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(fills.len(), 1, "echo strategy places exactly one order");
}

#[tokio::test]
async fn backtest_is_deterministic_across_identical_runs() {
    async fn run_once() -> weaver::backtest_engine::BacktestStats {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let event_log = Arc::new(EventLog::new(store, "test").await.unwrap());
        let (manager, bar_repo) = new_manager(event_log).await;

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::minutes(6);
        seed_bars(&bar_repo, start, 6, 250.0).await;

        let run = manager
            .create_run(CreateRunRequest {
                strategy_id: "echo_buy_at_tick".to_string(),
                mode: RunMode::Backtest,
                symbols: vec![SYMBOL.to_string()],
                timeframe: Timeframe::M1,
                start_time: Some(start),
                end_time: Some(end),
            })
            .await
            .unwrap();
        manager.start_run(&run.id).await.unwrap();
        wait_for_terminal(&manager, &run.id).await;
        manager.get_stats(&run.id).unwrap()
    }

    let a = run_once().await;
    let b = run_once().await;
    assert_eq!(a.final_equity, b.final_equity);
    assert_eq!(a.total_commission, b.total_commission);
    assert_eq!(a.total_slippage, b.total_slippage);
}

#[tokio::test]
async fn create_run_rejects_backtest_without_a_window() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let event_log = Arc::new(EventLog::new(store, "test").await.unwrap());
    let (manager, _bar_repo) = new_manager(event_log).await;

    let result = manager
        .create_run(CreateRunRequest {
            strategy_id: "echo_buy_at_tick".to_string(),
            mode: RunMode::Backtest,
            symbols: vec![SYMBOL.to_string()],
            timeframe: Timeframe::M1,
            start_time: None,
            end_time: None,
        })
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn stop_run_rejects_a_run_that_is_not_running() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let event_log = Arc::new(EventLog::new(store, "test").await.unwrap());
    let (manager, _bar_repo) = new_manager(event_log).await;

    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(6);
    let run = manager
        .create_run(CreateRunRequest {
            strategy_id: "echo_buy_at_tick".to_string(),
            mode: RunMode::Backtest,
            symbols: vec![SYMBOL.to_string()],
            timeframe: Timeframe::M1,
            start_time: Some(start),
            end_time: Some(end),
        })
        .await
        .unwrap();

    assert!(manager.stop_run(&run.id).await.is_err());
}

#[tokio::test]
async fn delete_run_rejects_a_run_that_is_still_running() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let event_log = Arc::new(EventLog::new(store, "test").await.unwrap());
    let (manager, bar_repo) = new_manager(event_log).await;

    let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    // A long window keeps the run in `Running` long enough for the assertion below.
    let end = start + chrono::Duration::minutes(600);
    seed_bars(&bar_repo, start, 2, 50.0).await;

    let run = manager
        .create_run(CreateRunRequest {
            strategy_id: "echo_buy_at_tick".to_string(),
            mode: RunMode::Backtest,
            symbols: vec![SYMBOL.to_string()],
            timeframe: Timeframe::M1,
            start_time: Some(start),
            end_time: Some(end),
        })
        .await
        .unwrap();
    manager.start_run(&run.id).await.unwrap();

    assert!(manager.delete_run(&run.id).await.is_err());
    manager.stop_run(&run.id).await.unwrap();
    wait_for_terminal(&manager, &run.id).await;
    manager.delete_run(&run.id).await.unwrap();
}
