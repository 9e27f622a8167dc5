//! The HTTP control plane: REST endpoints over the Run Manager and Event Log, plus the
//! SSE event stream. Thin by design — every handler delegates to a core component and
//! only translates between wire shapes and domain types.

pub mod dto;
pub mod middleware;
pub mod routes;

use crate::bar_repository::BarRepository;
use crate::event_log::EventLog;
use crate::run_manager::RunManager;
use crate::sse::SseBroadcaster;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub event_log: Arc<EventLog>,
    pub run_manager: Arc<RunManager>,
    pub bar_repository: Arc<dyn BarRepository>,
    pub sse: Arc<SseBroadcaster>,
}

pub use routes::build_router;
