//! Run: a trading session, and its lifecycle state machine.

use crate::error::{WeaverError, WeaverResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Paper,
    Live,
}

impl RunMode {
    pub fn is_backtest(&self) -> bool {
        matches!(self, RunMode::Backtest)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunMode::Backtest => "backtest",
            RunMode::Paper => "paper",
            RunMode::Live => "live",
        };
        write!(f, "{s}")
    }
}

/// `pending -> running -> {stopped | completed | error}`. No edge re-enters `pending` or
/// `running` from a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Stopped,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Completed | RunStatus::Error
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub strategy_id: String,
    pub mode: RunMode,
    pub symbols: Vec<String>,
    pub timeframe: crate::model::Timeframe,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Fields a client supplies when creating a run; validated by `CreateRunRequest::validate`
/// before a `Run` is ever constructed (validation errors never reach the Run Manager).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub strategy_id: String,
    pub mode: RunMode,
    pub symbols: Vec<String>,
    pub timeframe: crate::model::Timeframe,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CreateRunRequest {
    pub fn validate(&self) -> WeaverResult<()> {
        if self.strategy_id.trim().is_empty() {
            return Err(WeaverError::Validation("strategy_id is required".into()));
        }
        if self.symbols.is_empty() {
            return Err(WeaverError::Validation(
                "symbols must be a non-empty set".into(),
            ));
        }
        if self.mode.is_backtest() {
            let (start, end) = match (self.start_time, self.end_time) {
                (Some(s), Some(e)) => (s, e),
                _ => {
                    return Err(WeaverError::Validation(
                        "start_time and end_time are required for backtest runs".into(),
                    ))
                }
            };
            if start > end {
                return Err(WeaverError::Validation(
                    "start_time must not be after end_time".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Run {
    pub fn new(id: String, req: CreateRunRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            strategy_id: req.strategy_id,
            mode: req.mode,
            symbols: req.symbols,
            timeframe: req.timeframe,
            start_time: req.start_time,
            end_time: req.end_time,
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            stopped_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}
