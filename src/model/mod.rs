//! Core data model shared by every component: runs, envelopes, orders, fills,
//! positions, bars, and the strategy action union.

pub mod action;
pub mod bar;
pub mod envelope;
pub mod fill;
pub mod order;
pub mod position;
pub mod run;
pub mod window;

pub use action::StrategyAction;
pub use bar::{Bar, Timeframe};
pub use envelope::{Envelope, EventType};
pub use fill::Fill;
pub use order::{Order, OrderStatus, OrderType, Side, TimeInForce};
pub use position::SimulatedPosition;
pub use run::{CreateRunRequest, Run, RunMode, RunStatus};
pub use window::DataWindow;
