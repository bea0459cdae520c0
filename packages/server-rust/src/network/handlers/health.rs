//! Health probes and the keep-alive heartbeat.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;
use crate::network::HealthState;

/// Detailed health as JSON; always 200, the `state` field tells the story.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "services": state.registry.services().len(),
        "event_functions": state.dispatcher.function_names().len(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Always 200 while the process runs.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 200 when ready, 503 while starting or shutting down.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Mounted only for services declared with `keep_alive`.
pub async fn heartbeat_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "success"})))
}
