//! Bar Repository: read-through store for historical OHLCV bars.
//!
//! A missing range is not an error — callers (the Backtest Engine) treat it as "the
//! backtest cannot progress beyond the last available bar" and complete the run cleanly.

use crate::error::WeaverResult;
use crate::model::{Bar, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[async_trait]
pub trait BarRepository: Send + Sync {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>>;

    async fn get_bar_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        ts: DateTime<Utc>,
    ) -> WeaverResult<Option<Bar>>;

    async fn save_bars(&self, bars: Vec<Bar>) -> WeaverResult<()>;
}

type Key = (String, Timeframe);

/// In-memory implementation: a durable bar storage engine is out of scope here; this is
/// the minimal contract-faithful stand-in used by the rest of the core and by tests.
#[derive(Default)]
pub struct InMemoryBarRepository {
    // symbol+timeframe -> bar-open timestamp -> bar. A BTreeMap gives natural ascending
    // order for range scans without re-sorting on every read.
    bars: RwLock<std::collections::HashMap<Key, BTreeMap<DateTime<Utc>, Bar>>>,
}

impl InMemoryBarRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BarRepository for InMemoryBarRepository {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> WeaverResult<Vec<Bar>> {
        let bars = self.bars.read();
        let key = (symbol.to_string(), timeframe);
        Ok(bars
            .get(&key)
            .map(|series| {
                series
                    .range(start..=end)
                    .map(|(_, b)| b.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn get_bar_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        ts: DateTime<Utc>,
    ) -> WeaverResult<Option<Bar>> {
        let bars = self.bars.read();
        let key = (symbol.to_string(), timeframe);
        Ok(bars.get(&key).and_then(|series| series.get(&ts)).cloned())
    }

    async fn save_bars(&self, new_bars: Vec<Bar>) -> WeaverResult<()> {
        let mut bars = self.bars.write();
        for bar in new_bars {
            let key = (bar.symbol.clone(), bar.timeframe);
            bars.entry(key).or_default().insert(bar.timestamp, bar);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, ts: DateTime<Utc>, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M1,
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn missing_range_returns_empty_not_error() {
        let repo = InMemoryBarRepository::new();
        let bars = repo
            .get_bars("BTC/USD", Timeframe::M1, Utc::now(), Utc::now())
            .await
            .unwrap();
        assert!(bars.is_empty());
    }

    #[tokio::test]
    async fn upserts_by_natural_key() {
        let repo = InMemoryBarRepository::new();
        let t0 = Utc::now();
        repo.save_bars(vec![bar("BTC/USD", t0, 100.0)]).await.unwrap();
        repo.save_bars(vec![bar("BTC/USD", t0, 200.0)]).await.unwrap();
        let found = repo.get_bar_at("BTC/USD", Timeframe::M1, t0).await.unwrap();
        assert_eq!(found.unwrap().close, 200.0);
    }
}
