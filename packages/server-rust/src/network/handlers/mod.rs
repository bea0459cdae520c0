//! axum handlers and the state they share.

pub mod events;
pub mod health;
pub mod routes;

pub use events::{publish_handler, push_handler};
pub use health::{health_handler, heartbeat_handler, liveness_handler, readiness_handler};
pub use routes::serve_route;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::events::EventDispatcher;
use crate::service::ServiceRegistry;

/// Shared state handed to every handler through `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// For uptime in `/health`.
    pub start_time: Instant,
}
