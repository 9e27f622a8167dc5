//! Realtime clock: aligns to wall-clock bar boundaries with drift compensation.
//!
//! The target of each sleep is `start_instant + n * period`, not `last_emission +
//! period`, so handler latency never accumulates into permanent drift.

use super::{Clock, ClockMode, Tick, TickHandler};
use crate::model::Timeframe;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::warn;

pub struct RealtimeClock {
    timeframe: Timeframe,
    bar_index: AtomicU64,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl RealtimeClock {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            bar_index: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Clock for RealtimeClock {
    async fn run(&self, _run_id: String, handler: Arc<dyn TickHandler>) {
        self.bar_index.store(0, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let period_secs = self.timeframe.period_seconds();
        let period = Duration::from_secs(period_secs as u64);

        let now_utc = Utc::now();
        let first_boundary_utc = self.timeframe.next_boundary_at_or_after(now_utc);
        let wait_for_first =
            Duration::from_millis((first_boundary_utc - now_utc).num_milliseconds().max(0) as u64);

        let start_instant = Instant::now() + wait_for_first;
        let mut boundary_utc = first_boundary_utc;
        let mut n: u32 = 0;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let target = start_instant + period * n;
            sleep_until(target).await;

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let drift = Instant::now().saturating_duration_since(target);
            if drift >= period {
                warn!(
                    drift_ms = drift.as_millis() as u64,
                    period_ms = period.as_millis() as u64,
                    "realtime clock emission drifted by a full period or more"
                );
            }

            let tick = Tick {
                timestamp: boundary_utc,
                bar_index: self.bar_index.load(Ordering::SeqCst),
                mode: ClockMode::Realtime,
            };
            handler.on_tick(tick).await;

            self.bar_index.fetch_add(1, Ordering::SeqCst);
            boundary_utc += chrono::Duration::seconds(period_secs);
            n += 1;
        }

        self.running.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn bar_index(&self) -> u64 {
        self.bar_index.load(Ordering::SeqCst)
    }
}
