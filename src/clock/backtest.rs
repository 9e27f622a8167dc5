//! Backtest clock: iterates a finite range with full backpressure — the handler's
//! completion gates the next tick, so backtests are not merely fast, they are
//! deterministic in how quickly consumers fall behind (they never do).

use super::{Clock, ClockMode, Tick, TickHandler};
use crate::model::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct BacktestClock {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeframe: Timeframe,
    bar_index: AtomicU64,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl BacktestClock {
    /// `start` inclusive, `end` exclusive, both aligned to `timeframe` boundaries.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, timeframe: Timeframe) -> Self {
        Self {
            start: timeframe.align(start),
            end: timeframe.align(end),
            timeframe,
            bar_index: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Clock for BacktestClock {
    async fn run(&self, _run_id: String, handler: Arc<dyn TickHandler>) {
        self.bar_index.store(0, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let period = chrono::Duration::seconds(self.timeframe.period_seconds());
        let mut current = self.start;

        while current < self.end {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let tick = Tick {
                timestamp: current,
                bar_index: self.bar_index.load(Ordering::SeqCst),
                mode: ClockMode::Backtest,
            };
            handler.on_tick(tick).await;

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            self.bar_index.fetch_add(1, Ordering::SeqCst);
            current += period;
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct RecordingHandler {
        ticks: Mutex<Vec<Tick>>,
    }

    #[async_trait]
    impl TickHandler for RecordingHandler {
        async fn on_tick(&self, tick: Tick) {
            self.ticks.lock().unwrap().push(tick);
        }
    }

    #[tokio::test]
    async fn emits_ticks_from_start_inclusive_to_end_exclusive() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 9, 35, 0).unwrap();
        let clock = BacktestClock::new(start, end, Timeframe::M1);
        let handler = Arc::new(RecordingHandler {
            ticks: Mutex::new(Vec::new()),
        });
        clock.run("r1".into(), handler.clone()).await;

        let ticks = handler.ticks.lock().unwrap();
        assert_eq!(ticks.len(), 5);
        assert_eq!(ticks[0].timestamp, start);
        assert_eq!(ticks[0].bar_index, 0);
        assert_eq!(ticks[4].bar_index, 4);
    }

    #[tokio::test]
    async fn start_equals_end_emits_no_ticks() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap();
        let clock = BacktestClock::new(t, t, Timeframe::M1);
        let handler = Arc::new(RecordingHandler {
            ticks: Mutex::new(Vec::new()),
        });
        clock.run("r1".into(), handler.clone()).await;
        assert!(handler.ticks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_exits_loop_before_end() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap();
        let clock = Arc::new(BacktestClock::new(start, end, Timeframe::M1));
        struct StoppingHandler {
            clock: Arc<BacktestClock>,
            ticks: Mutex<Vec<Tick>>,
        }
        #[async_trait]
        impl TickHandler for StoppingHandler {
            async fn on_tick(&self, tick: Tick) {
                self.ticks.lock().unwrap().push(tick);
                if tick.bar_index == 1 {
                    self.clock.stop();
                }
            }
        }
        let handler = Arc::new(StoppingHandler {
            clock: clock.clone(),
            ticks: Mutex::new(Vec::new()),
        });
        clock.run("r1".into(), handler.clone()).await;
        assert_eq!(handler.ticks.lock().unwrap().len(), 2);
    }
}
