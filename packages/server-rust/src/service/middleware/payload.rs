//! Runs the mutation pipeline over request bodies.
//!
//! For `POST`, `PUT` and `PATCH` routes the body must be a JSON object; it is
//! validated, filled with defaults and passed through write modifiers, and
//! the prepared record replaces the body before the handler runs. `DELETE`
//! bodies skip validation but an object body still goes through the write
//! modifiers. Routes flagged `ignore_body` and services without any schema
//! are passed through.

use std::sync::Arc;
use std::task::{Context, Poll};

use pipewright_core::{apply_modifiers, prepare_mutation, Method, MutationPlan, Schema};
use serde_json::Value;
use tower::{Layer, Service};
use tracing::debug;

use super::RouteFuture;
use crate::service::definition::RouteBinding;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};

#[derive(Debug, Clone)]
pub struct PayloadLayer {
    binding: Arc<RouteBinding>,
}

impl PayloadLayer {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>) -> Self {
        Self { binding }
    }
}

impl<S> Layer<S> for PayloadLayer {
    type Service = PayloadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PayloadService {
            inner,
            binding: Arc::clone(&self.binding),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadService<S> {
    inner: S,
    binding: Arc<RouteBinding>,
}

/// Validates and prepares `req.body` in place.
async fn prepare(binding: &RouteBinding, req: &mut RouteRequest) -> Result<(), RouteError> {
    let method = req.mutation_method();
    if binding.route.ignore_body {
        return Ok(());
    }
    match method {
        Method::Create | Method::Update => {}
        Method::Delete => return modify_delete_body(binding, req).await,
        Method::Read => return Ok(()),
    }
    let Some(validation) = binding.validation_schema(method) else {
        return Ok(());
    };

    let payload = match req.body.take() {
        Value::Object(payload) => payload,
        Value::Null => serde_json::Map::new(),
        other => {
            req.body = other;
            return Err(RouteError::BadRequest("request body must be a JSON object".into()));
        }
    };

    let empty = Schema::default();
    let plan = MutationPlan {
        validation,
        defaults: binding.service_schema().unwrap_or(&empty),
        modifiers: binding.modifier_schema(method),
    };

    match prepare_mutation(plan, payload, method, &req.ctx).await {
        Ok(record) => {
            req.body = Value::Object(record);
            Ok(())
        }
        Err(e) => {
            debug!(service = %binding.base_path, error = %e, "payload rejected");
            Err(e.into())
        }
    }
}

async fn modify_delete_body(binding: &RouteBinding, req: &mut RouteRequest) -> Result<(), RouteError> {
    let Some(schema) = binding.modifier_schema(Method::Delete) else {
        return Ok(());
    };
    let Value::Object(record) = &mut req.body else {
        return Ok(());
    };
    apply_modifiers(schema, record, Method::Delete, &req.ctx)
        .await
        .map_err(|e| {
            debug!(service = %binding.base_path, error = %e, "delete body rejected");
            RouteError::from(e)
        })
}

impl<S> Service<RouteRequest> for PayloadService<S>
where
    S: Service<RouteRequest, Response = HandlerResponse, Error = RouteError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = HandlerResponse;
    type Error = RouteError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RouteRequest) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let binding = Arc::clone(&self.binding);

        Box::pin(async move {
            prepare(&binding, &mut req).await?;
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use pipewright_core::{FieldRule, ValueKind};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::definition::{Route, ServiceDefinition};
    use crate::service::handler::{FnHandler, HandlerError};
    use crate::service::selector::HandlerSelector;

    fn noop() -> HandlerSelector {
        HandlerSelector::single(FnHandler(|_req: RouteRequest| async {
            Ok::<_, HandlerError>(None)
        }))
    }

    fn contacts() -> ServiceDefinition {
        ServiceDefinition::new("contacts").schema(
            Schema::builder()
                .field("name", FieldRule::new(ValueKind::String).required())
                .field("status", FieldRule::new(ValueKind::String).default_value("new"))
                .field("id", FieldRule::new(ValueKind::String).read_only())
                .build(),
        )
    }

    async fn run(route: Route, req: RouteRequest) -> Result<HandlerResponse, RouteError> {
        let echo = tower::service_fn(|req: RouteRequest| async move {
            Ok::<_, RouteError>(HandlerResponse::ok(req.body))
        });
        PayloadLayer::new(Arc::new(RouteBinding::new(&contacts(), route)))
            .layer(echo)
            .oneshot(req)
            .await
    }

    #[tokio::test]
    async fn create_body_is_prepared() {
        let req = RouteRequest::new(http::Method::POST, "/contacts")
            .with_body(json!({"name": "Ada", "id": "forged", "extra": true}));
        let resp = run(Route::post("/", noop()), req).await.unwrap();
        assert_eq!(resp.body, Some(json!({"name": "Ada", "status": "new"})));
    }

    #[tokio::test]
    async fn invalid_create_is_rejected() {
        let req = RouteRequest::new(http::Method::POST, "/contacts").with_body(json!({}));
        let err = run(Route::post("/", noop()), req).await.unwrap_err();
        assert!(matches!(err, RouteError::Validation(_)));
    }

    #[tokio::test]
    async fn non_object_body_is_bad_request() {
        let req = RouteRequest::new(http::Method::PUT, "/contacts").with_body(json!([1, 2]));
        let err = run(Route::put("/", noop()), req).await.unwrap_err();
        assert!(matches!(err, RouteError::BadRequest(_)));
    }

    #[tokio::test]
    async fn delete_body_runs_modifiers_without_validation() {
        let service = ServiceDefinition::new("contacts")
            .schema(
                Schema::builder()
                    .field("name", FieldRule::new(ValueKind::String).required())
                    .field(
                        "reason",
                        FieldRule::new(ValueKind::String).modify_with(|value, _record, _ctx| {
                            Ok(Value::String(value.as_str().unwrap_or_default().to_uppercase()))
                        }),
                    )
                    .build(),
            )
            .with_modifiers();
        let echo = tower::service_fn(|req: RouteRequest| async move {
            Ok::<_, RouteError>(HandlerResponse::ok(req.body))
        });
        let req = RouteRequest::new(http::Method::DELETE, "/contacts/1")
            .with_body(json!({"reason": "dup", "extra": 1}));
        let resp = PayloadLayer::new(Arc::new(RouteBinding::new(
            &service,
            Route::delete("/{id}", noop()),
        )))
        .layer(echo)
        .oneshot(req)
        .await
        .unwrap();
        assert_eq!(resp.body, Some(json!({"reason": "DUP", "extra": 1})));
    }

    #[tokio::test]
    async fn ignored_body_and_reads_pass_through() {
        let body = json!({"anything": [1, 2, 3]});
        let req = RouteRequest::new(http::Method::POST, "/contacts").with_body(body.clone());
        let resp = run(Route::post("/", noop()).ignore_body(), req).await.unwrap();
        assert_eq!(resp.body, Some(body.clone()));

        let req = RouteRequest::new(http::Method::GET, "/contacts").with_body(body.clone());
        let resp = run(Route::get("/", noop()), req).await.unwrap();
        assert_eq!(resp.body, Some(body));
    }
}
