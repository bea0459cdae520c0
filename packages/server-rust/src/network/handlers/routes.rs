//! Bridges axum requests into compiled route pipelines.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::AppState;
use crate::service::{RouteError, RoutePipeline, RouteRequest};

/// Runs one request through `pipeline`.
///
/// Path parameters land in `ctx.params`; the body is parsed as JSON (an
/// empty body is `null`) and capped by the router's `DefaultBodyLimit`.
/// While the server drains, new calls get a 503.
pub async fn serve_route(
    pipeline: RoutePipeline,
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    if !state.shutdown.is_accepting() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "error": "server is shutting down"})),
        )
            .into_response();
    }
    let _guard = state.shutdown.in_flight_guard();

    let route_request = match into_route_request(params, request).await {
        Ok(route_request) => route_request,
        Err(e) => return e.into_response(),
    };

    match pipeline.oneshot(route_request).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn into_route_request(
    params: HashMap<String, String>,
    request: Request,
) -> Result<RouteRequest, RouteError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let bytes = Bytes::from_request(request, &()).await.map_err(|rejection| {
        let message = format!("failed to read request body: {}", rejection.body_text());
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RouteError::PayloadTooLarge(message)
        } else {
            RouteError::BadRequest(message)
        }
    })?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| RouteError::BadRequest(format!("request body is not valid JSON: {e}")))?
    };

    let mut route_request = RouteRequest::new(method, path).with_body(body);
    route_request.headers = headers;
    route_request.ctx.params.extend(params);
    Ok(route_request)
}
