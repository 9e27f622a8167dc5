//! DataWindow: the payload of `data.WindowReady`, built from preloaded/historical bars
//! in response to a prior `FetchWindow` action, matched by correlation id.

use super::bar::{Bar, Timeframe};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataWindow {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}
