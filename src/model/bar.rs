//! Bar: an OHLCV record for one (symbol, timeframe, timestamp) triple, and the canonical
//! timeframe enum shared by the clock, fill simulator, and bar repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn period_seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// `floor(unix_seconds / period_seconds) * period_seconds`, so day boundaries align
    /// to UTC midnight and every other timeframe aligns to the epoch.
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let period = self.period_seconds();
        let unix = ts.timestamp();
        let aligned = (unix.div_euclid(period)) * period;
        DateTime::from_timestamp(aligned, 0).expect("aligned timestamp in range")
    }

    pub fn next_boundary_at_or_after(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let aligned = self.align(ts);
        if aligned == ts {
            aligned
        } else {
            aligned + chrono::Duration::seconds(self.period_seconds())
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1m" => Timeframe::M1,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "4h" => Timeframe::H4,
            "1d" => Timeframe::D1,
            other => return Err(format!("unsupported timeframe: {other}")),
        })
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar-open time, UTC, aligned to `timeframe`.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn aligns_minute_boundaries() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 45).unwrap();
        let aligned = Timeframe::M1.align(ts);
        assert_eq!(aligned, Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn aligns_day_boundaries_to_utc_midnight() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 45).unwrap();
        let aligned = Timeframe::D1.align(ts);
        assert_eq!(aligned, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }
}
