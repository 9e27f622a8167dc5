//! Environment-sourced configuration. No runtime behavior depends on a variable not
//! named here.

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Parsed from `WEAVER_EXCHANGE_CREDENTIALS_LIVE`, a JSON object:
/// `{"base_url": "...", "api_key": "...", "api_secret": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveExchangeCredentials {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_url: String,
    pub host: String,
    pub port: u16,
    pub default_timeframe: crate::model::Timeframe,
    pub slippage_bps: f64,
    pub commission_bps: f64,
    pub commission_floor: f64,
    pub heartbeat_interval: Duration,
    pub sse_channel_capacity: usize,
    pub exchange_credentials_paper: Option<String>,
    pub exchange_credentials_live: Option<String>,
    pub plugin_dir_strategies: String,
    pub plugin_dir_adapters: String,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        Self {
            storage_url: env_var("WEAVER_STORAGE_URL").unwrap_or_else(|| "memory://".into()),
            host: env_var("WEAVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_parse("WEAVER_PORT", 8080u16),
            default_timeframe: env_var("WEAVER_DEFAULT_TIMEFRAME")
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::model::Timeframe::M1),
            slippage_bps: env_parse("WEAVER_SLIPPAGE_BPS", 1.0),
            commission_bps: env_parse("WEAVER_COMMISSION_BPS", 2.0),
            commission_floor: env_parse("WEAVER_COMMISSION_FLOOR", 0.0),
            heartbeat_interval: Duration::from_secs(env_parse(
                "WEAVER_HEARTBEAT_INTERVAL_SECS",
                30u64,
            )),
            sse_channel_capacity: env_parse("WEAVER_SSE_CHANNEL_CAPACITY", 256usize),
            exchange_credentials_paper: env_var("WEAVER_EXCHANGE_CREDENTIALS_PAPER"),
            exchange_credentials_live: env_var("WEAVER_EXCHANGE_CREDENTIALS_LIVE"),
            plugin_dir_strategies: env_var("WEAVER_PLUGIN_DIR_STRATEGIES")
                .unwrap_or_else(|| "plugins/strategies".into()),
            plugin_dir_adapters: env_var("WEAVER_PLUGIN_DIR_ADAPTERS")
                .unwrap_or_else(|| "plugins/adapters".into()),
        }
    }

    pub fn live_exchange_credentials(&self) -> Option<LiveExchangeCredentials> {
        let raw = self.exchange_credentials_live.as_ref()?;
        serde_json::from_str(raw).ok()
    }
}
