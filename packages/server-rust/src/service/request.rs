//! Request, response, and error types flowing through a route pipeline.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, StatusCode};
use pipewright_core::{CallerContext, DefaultError, Method, ModifierError, PrepareError, ValidationError};
use serde_json::{json, Value};

use super::handler::HandlerError;

// ---------------------------------------------------------------------------
// RouteRequest
// ---------------------------------------------------------------------------

/// One call into a route.
///
/// `body` is the parsed JSON body (`Null` when absent). For routes that run
/// the mutation pipeline it is replaced by the prepared record before the
/// handler sees it; `ctx.payload` keeps the body as submitted.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
    pub ctx: CallerContext,
}

impl RouteRequest {
    #[must_use]
    pub fn new(method: http::Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Value::Null,
            ctx: CallerContext::new(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Pipeline method derived from the HTTP verb.
    #[must_use]
    pub fn mutation_method(&self) -> Method {
        Method::from_http(self.method.as_str())
    }

    /// First value of a header, if it is valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        if let Value::Object(payload) = &body {
            self.ctx.payload = payload.clone();
        }
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_context(mut self, ctx: CallerContext) -> Self {
        self.ctx = ctx;
        self
    }
}

// ---------------------------------------------------------------------------
// HandlerResponse
// ---------------------------------------------------------------------------

/// Successful route result: status, optional JSON body, extra headers.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Empty 200, sent when a handler returns nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };
        response.headers_mut().extend(self.headers);
        response
    }
}

// ---------------------------------------------------------------------------
// RouteError
// ---------------------------------------------------------------------------

/// Every way a route call can fail before or inside its handler.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Defaults(#[from] DefaultError),
    #[error(transparent)]
    Modifier(#[from] ModifierError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("caller mode is not permitted on this route")]
    Forbidden,
    #[error("internal error")]
    NoHandlerForRole,
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
}

impl From<PrepareError> for RouteError {
    fn from(err: PrepareError) -> Self {
        match err {
            PrepareError::Validation(e) => Self::Validation(e),
            PrepareError::Default(e) => Self::Defaults(e),
            PrepareError::Modifier(e) => Self::Modifier(e),
        }
    }
}

impl RouteError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Defaults(_) | Self::Modifier(_) | Self::NoHandlerForRole => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Handler(e) => e.status(),
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// JSON body sent to the caller.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::Forbidden => json!({"status": "unauthorized"}),
            other => json!({"status": "error", "error": other.to_string()}),
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Defaults(_) => "defaults",
            Self::Modifier(_) => "modifier",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NoHandlerForRole => "no_handler",
            Self::Handler(_) => "handler",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pipewright_core::{TypeSpec, ValueKind};

    use super::*;

    #[test]
    fn error_statuses_and_bodies() {
        let validation = RouteError::from(ValidationError::MissingRequired {
            field: "name".into(),
        });
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            validation.body(),
            json!({"status": "error", "error": "name is required and missing"})
        );

        assert_eq!(RouteError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(RouteError::Forbidden.body(), json!({"status": "unauthorized"}));

        assert_eq!(
            RouteError::NoHandlerForRole.body(),
            json!({"status": "error", "error": "internal error"})
        );
        assert_eq!(
            RouteError::Unauthorized("unauthorized".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn handler_errors_keep_their_status() {
        let err = RouteError::from(HandlerError::new(StatusCode::CONFLICT, "already exists"));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.body(), json!({"status": "error", "error": "already exists"}));

        let err = RouteError::from(HandlerError::from(anyhow::anyhow!("db down")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn prepare_errors_map_to_their_stage() {
        let err = RouteError::from(PrepareError::Validation(ValidationError::InvalidType {
            field: "n".into(),
            expected: TypeSpec::One(ValueKind::Number),
            found: ValueKind::String,
        }));
        assert!(matches!(err, RouteError::Validation(_)));
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn body_fills_caller_payload() {
        let req = RouteRequest::new(http::Method::POST, "/items").with_body(json!({"a": 1}));
        assert_eq!(req.ctx.payload.get("a"), Some(&json!(1)));
        assert_eq!(req.mutation_method(), Method::Create);
    }
}
