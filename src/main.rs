//! Weaver control plane binary: wires the core components together behind an HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weaver::api::{self, ApiState};
use weaver::bar_repository::{BarRepository, InMemoryBarRepository};
use weaver::config::Config;
use weaver::event_log::memory::InMemoryEventStore;
use weaver::event_log::sqlite::SqliteEventStore;
use weaver::event_log::{EventLog, EventStore};
use weaver::run_manager::RunManager;
use weaver::sse::SseBroadcaster;
use weaver::strategy::loader::StrategyLoader;

#[derive(Parser)]
#[command(name = "weaver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control plane. The default when no subcommand is given.
    Serve,
    /// Apply the durable store's schema and exit, without starting the server.
    Migrate,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weaver=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_event_store(storage_url: &str) -> Result<Arc<dyn EventStore>> {
    if storage_url == "memory://" {
        Ok(Arc::new(InMemoryEventStore::new()))
    } else {
        let path = storage_url.strip_prefix("sqlite://").unwrap_or(storage_url);
        Ok(Arc::new(
            SqliteEventStore::open(path).context("failed to open sqlite event store")?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let config = Arc::new(Config::from_env());

    if matches!(cli.command, Some(Command::Migrate)) {
        build_event_store(&config.storage_url)?;
        info!("schema applied");
        return Ok(());
    }

    let prometheus = PrometheusBuilder::new();
    prometheus
        .install()
        .context("failed to install prometheus metrics recorder")?;

    let store = build_event_store(&config.storage_url)?;
    let event_log = Arc::new(EventLog::new(store, "weaver").await?);
    let bar_repository: Arc<dyn BarRepository> = Arc::new(InMemoryBarRepository::new());
    let strategy_loader = Arc::new(StrategyLoader::new(config.plugin_dir_strategies.clone()));

    let run_manager = RunManager::new(
        event_log.clone(),
        bar_repository.clone(),
        strategy_loader,
        config.clone(),
    )
    .await?;

    let sse = Arc::new(SseBroadcaster::new(
        event_log.clone(),
        config.heartbeat_interval,
        config.sse_channel_capacity,
    ));

    let state = Arc::new(ApiState {
        event_log,
        run_manager: run_manager.clone(),
        bar_repository,
        sse,
    });
    let app = api::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind listener")?;
    info!(addr, "weaver control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(run_manager))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(run_manager: Arc<RunManager>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received; marking in-flight runs as errored");
    run_manager.shutdown().await;
}
