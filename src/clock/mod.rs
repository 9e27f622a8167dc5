//! Clock: emits monotonically increasing ticks aligned to a timeframe.

pub mod backtest;
pub mod realtime;

pub use backtest::BacktestClock;
pub use realtime::RealtimeClock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Backtest,
    Realtime,
}

/// One clock emission. The timestamp is always the bar-open time, never the wall time of
/// emission.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub bar_index: u64,
    pub mode: ClockMode,
}

/// Invoked once per tick; the next tick is not emitted until this returns (backpressure
/// is always on for the backtest clock, and bounds handler latency for the realtime
/// clock — see `RealtimeClock`'s drift compensation).
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, tick: Tick);
}

/// Common contract for both clock implementations.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Runs the clock loop to completion (backtest) or until `stop()` is called
    /// (realtime). Re-entrant: a fresh `start` after the loop returns resets
    /// `bar_index` and the running flag.
    async fn run(&self, run_id: String, handler: std::sync::Arc<dyn TickHandler>);

    /// Cooperative cancellation: the loop exits at its next await boundary.
    fn stop(&self);

    fn bar_index(&self) -> u64;
}
