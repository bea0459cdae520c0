//! HTTP entry points for the message bus.
//!
//! `POST /events/{function}` accepts a push delivery for one event function:
//!
//! ```json
//! {"message": {"data": "<base64>", "messageId": "E1", "publishTime": "...", "attributes": {}}}
//! ```
//!
//! `POST /topics/{topic}` publishes a raw message to every function
//! subscribed to the topic and reports each outcome.
//!
//! A 2xx acknowledges the delivery. Anything else asks the bus to redeliver.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use pipewright_core::{EventContext, RawMessage};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::events::EventError;

/// A push delivery as sent by the bus.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, alias = "message_id")]
    pub message_id: String,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PushMessage {
    fn split(self) -> (RawMessage, EventContext) {
        let mut context = EventContext::new(self.message_id);
        context.timestamp = self.publish_time;
        context.event_type = self.attributes.get("type").cloned();
        let raw = RawMessage {
            data: self.data,
            attributes: self.attributes,
        };
        (raw, context)
    }
}

fn error_status(err: &EventError) -> StatusCode {
    match err {
        EventError::UnknownFunction(_) => StatusCode::NOT_FOUND,
        EventError::Decode(_) => StatusCode::BAD_REQUEST,
        EventError::Handler(_) | EventError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &EventError) -> Response {
    (
        error_status(err),
        Json(json!({"status": "error", "error": err.to_string()})),
    )
        .into_response()
}

fn draining() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"status": "error", "error": "server is shutting down"})),
    )
        .into_response()
}

/// Runs one event function. Handled, duplicate and stale deliveries are all
/// acknowledged with 204.
pub async fn push_handler(
    State(state): State<AppState>,
    Path(function): Path<String>,
    Json(push): Json<PushRequest>,
) -> Response {
    if !state.shutdown.is_accepting() {
        return draining();
    }
    let _guard = state.shutdown.in_flight_guard();

    let (raw, context) = push.message.split();
    match state.dispatcher.deliver(&function, &raw, context).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// Fans a message out to the subscribers of `topic`.
pub async fn publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(message): Json<RawMessage>,
) -> Response {
    if !state.shutdown.is_accepting() {
        return draining();
    }
    let _guard = state.shutdown.in_flight_guard();

    let context = EventContext::new(uuid::Uuid::new_v4().to_string()).with_timestamp(Utc::now());
    match state.dispatcher.publish(&topic, &message, context).await {
        Ok(results) => {
            let failed = results.iter().any(|(_, r)| r.is_err());
            let report: Vec<_> = results
                .iter()
                .map(|(function, result)| match result {
                    Ok(outcome) => json!({"function": function, "outcome": outcome.as_str()}),
                    Err(e) => json!({"function": function, "outcome": e.kind(), "error": e.to_string()}),
                })
                .collect();
            let status = if failed {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            (status, Json(json!({"topic": topic, "results": report}))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn push_message_becomes_raw_message_and_context() {
        let push: PushRequest = serde_json::from_value(json!({
            "message": {
                "data": "e30=",
                "messageId": "E9",
                "publishTime": "2024-03-01T12:00:00Z",
                "attributes": {"type": "create"}
            },
            "subscription": "projects/p/subscriptions/orders"
        }))
        .unwrap();

        let (raw, context) = push.message.split();
        assert_eq!(raw.data.as_deref(), Some("e30="));
        assert_eq!(context.event_id, "E9");
        assert_eq!(context.event_type.as_deref(), Some("create"));
        assert!(context.timestamp.is_some());
    }

    #[test]
    fn errors_map_to_redelivery_statuses() {
        assert_eq!(
            error_status(&EventError::UnknownFunction("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&EventError::Handler(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
