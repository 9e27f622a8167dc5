//! Strategy plugin contract: pure decision logic reacting to ticks and data windows by
//! returning intents. Strategies never touch the Event Log, an adapter, or a clock
//! directly — the Strategy Runner is the only thing that talks to the rest of the system
//! on their behalf.

pub mod echo;
pub mod loader;
pub mod runner;

use crate::clock::Tick;
use crate::model::{DataWindow, StrategyAction};

/// A strategy is owned exclusively by one `StrategyRunner` for the lifetime of a run; it
/// is never shared across runs or threads concurrently, so `&mut self` is sufficient.
pub trait Strategy: Send {
    fn id(&self) -> &str;

    fn initialize(&mut self, symbols: &[String], params: serde_json::Value);

    fn on_tick(&mut self, tick: Tick) -> Vec<StrategyAction>;

    fn on_data(&mut self, window: DataWindow) -> Vec<StrategyAction>;
}
