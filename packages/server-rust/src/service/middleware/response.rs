//! Field-level filtering of handler responses by caller mode.

use std::sync::Arc;
use std::task::{Context, Poll};

use pipewright_core::filter_response;
use tower::{Layer, Service};

use super::RouteFuture;
use crate::service::config::PipelineConfig;
use crate::service::definition::RouteBinding;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};

/// Strips fields the caller's mode may not see from successful responses.
///
/// Uses the service schema and the route's unwrap adapter, falling back to
/// the configured one. Callers without a mode get the response unchanged.
#[derive(Debug, Clone)]
pub struct ResponseVisibilityLayer {
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl ResponseVisibilityLayer {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>, config: Arc<PipelineConfig>) -> Self {
        Self { binding, config }
    }
}

impl<S> Layer<S> for ResponseVisibilityLayer {
    type Service = ResponseVisibilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseVisibilityService {
            inner,
            binding: Arc::clone(&self.binding),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseVisibilityService<S> {
    inner: S,
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl<S> Service<RouteRequest> for ResponseVisibilityService<S>
where
    S: Service<RouteRequest, Response = HandlerResponse, Error = RouteError>,
    S::Future: Send + 'static,
{
    type Response = HandlerResponse;
    type Error = RouteError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        let mode = req.ctx.mode.clone();
        let fut = self.inner.call(req);

        let Some(mode) = mode else {
            return Box::pin(fut);
        };
        let binding = Arc::clone(&self.binding);
        let adapter = binding
            .unwrap_adapter()
            .map_or_else(|| Arc::clone(&self.config.unwrap), Arc::clone);

        Box::pin(async move {
            let mut response = fut.await?;
            if let (Some(schema), Some(body)) = (binding.service_schema(), response.body.take()) {
                response.body = Some(filter_response(&mode, schema, adapter.as_ref(), body));
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use pipewright_core::{EnvelopeField, FieldRule, Schema, ValueKind};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::definition::{Route, ServiceDefinition};
    use crate::service::handler::{FnHandler, HandlerError};
    use crate::service::selector::HandlerSelector;

    fn binding(route: Route) -> Arc<RouteBinding> {
        let service = ServiceDefinition::new("contacts").schema(
            Schema::builder()
                .field("name", FieldRule::new(ValueKind::String))
                .field("email", FieldRule::new(ValueKind::String).visibility("internal"))
                .build(),
        );
        Arc::new(RouteBinding::new(&service, route))
    }

    fn route() -> Route {
        Route::get(
            "/",
            HandlerSelector::single(FnHandler(|_req: RouteRequest| async {
                Ok::<_, HandlerError>(None)
            })),
        )
    }

    async fn fetch(binding: Arc<RouteBinding>, mode: Option<&str>) -> serde_json::Value {
        let handler = tower::service_fn(|_req: RouteRequest| async {
            Ok::<_, RouteError>(HandlerResponse::ok(json!({
                "status": "success",
                "data": [{"name": "Ada", "email": "ada@example.com"}],
            })))
        });
        let mut req = RouteRequest::new(http::Method::GET, "/contacts");
        req.ctx.mode = mode.map(str::to_string);
        ResponseVisibilityLayer::new(binding, PipelineConfig::builder().build())
            .layer(handler)
            .oneshot(req)
            .await
            .unwrap()
            .body
            .unwrap()
    }

    #[tokio::test]
    async fn envelope_data_is_filtered_for_external_callers() {
        let body = fetch(binding(route().unwrap_with(EnvelopeField::new("data"))), Some("external")).await;
        assert_eq!(body, json!({"status": "success", "data": [{"name": "Ada"}]}));
    }

    #[tokio::test]
    async fn callers_without_mode_see_everything() {
        let body = fetch(binding(route().unwrap_with(EnvelopeField::new("data"))), None).await;
        assert_eq!(body["data"][0]["email"], json!("ada@example.com"));
    }

    #[tokio::test]
    async fn default_adapter_filters_the_whole_body() {
        // The envelope's own keys are not in the schema, so nothing is removed.
        let body = fetch(binding(route()), Some("external")).await;
        assert_eq!(body["data"][0]["email"], json!("ada@example.com"));
    }
}
