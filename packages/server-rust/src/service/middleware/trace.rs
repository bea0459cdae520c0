//! Tracing and metrics for route calls.
//!
//! Every call runs inside a `route` span carrying the service, method and
//! path; duration and outcome are recorded when the call finishes and the
//! `pipewright_route_requests_total` counter is incremented.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::RouteFuture;
use crate::service::definition::RouteBinding;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};

// ---------------------------------------------------------------------------
// TraceLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceLayer {
    binding: Arc<RouteBinding>,
}

impl TraceLayer {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>) -> Self {
        Self { binding }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            binding: Arc::clone(&self.binding),
        }
    }
}

// ---------------------------------------------------------------------------
// TraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
    binding: Arc<RouteBinding>,
}

impl<S> Service<RouteRequest> for TraceService<S>
where
    S: Service<RouteRequest, Response = HandlerResponse, Error = RouteError> + Send,
    S::Future: Send + 'static,
{
    type Response = HandlerResponse;
    type Error = RouteError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        let service = self.binding.base_path.clone();
        let method = req.method.to_string();

        let span = info_span!(
            "route",
            service = %service,
            method = %method,
            path = %req.path,
            trace_id = %req.ctx.trace_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.kind(),
                };
                let status = match &result {
                    Ok(resp) => resp.status.as_u16(),
                    Err(e) => e.status().as_u16(),
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "pipewright_route_requests_total",
                    "service" => service,
                    "method" => method,
                    "outcome" => outcome,
                )
                .increment(1);

                tracing::info!(status, duration_ms, outcome, "route complete");
                result
            }
            .instrument(span),
        )
    }
}
