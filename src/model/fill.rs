//! Fill: immutable once recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: String,
    pub order_id: String,
    pub qty: f64,
    pub price: f64,
    pub commission: f64,
    pub slippage: f64,
    pub timestamp: DateTime<Utc>,
}
