//! Application route handlers.

use std::future::Future;

use async_trait::async_trait;
use http::StatusCode;

use super::request::{HandlerResponse, RouteRequest};

/// Failure raised by application code inside a handler.
///
/// Sent to the caller as `status` (500 when unset) with the message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status: Option<StatusCode>,
    pub message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: None,
            message: err.to_string(),
        }
    }
}

pub type HandlerResult = Result<Option<HandlerResponse>, HandlerError>;

/// Business logic behind a route.
///
/// Returning `Ok(None)` sends an empty 200.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: RouteRequest) -> HandlerResult;
}

/// Adapts an async closure into a [`RouteHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(RouteRequest) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: RouteRequest) -> HandlerResult {
        (self.0)(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn closure_handler_echoes_body() {
        let handler = FnHandler(|req: RouteRequest| async move {
            Ok::<_, HandlerError>(Some(HandlerResponse::ok(req.body)))
        });
        let req = RouteRequest::new(http::Method::POST, "/").with_body(json!({"x": 1}));
        let resp = handler.handle(req).await.unwrap().unwrap();
        assert_eq!(resp.body, Some(json!({"x": 1})));
    }

    #[test]
    fn unset_status_defaults_to_500() {
        let err = HandlerError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "boom");
    }
}
