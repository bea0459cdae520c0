//! Access gates run before the payload is touched.
//!
//! [`PrivilegeLayer`] asks the configured [`PrivilegeGate`] whether the caller
//! may invoke the route (401 on rejection). [`VisibilityLayer`] rejects
//! callers whose mode the route is not visible to (403).
//!
//! [`PrivilegeGate`]: crate::service::privilege::PrivilegeGate

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::warn;

use super::RouteFuture;
use crate::service::config::PipelineConfig;
use crate::service::definition::RouteBinding;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};

// ---------------------------------------------------------------------------
// PrivilegeLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PrivilegeLayer {
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl PrivilegeLayer {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>, config: Arc<PipelineConfig>) -> Self {
        Self { binding, config }
    }
}

impl<S> Layer<S> for PrivilegeLayer {
    type Service = PrivilegeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrivilegeService {
            inner,
            binding: Arc::clone(&self.binding),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivilegeService<S> {
    inner: S,
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl<S> Service<RouteRequest> for PrivilegeService<S>
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

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        // The ready inner service moves into the future; a fresh clone stays.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let binding = Arc::clone(&self.binding);
        let gate = Arc::clone(&self.config.privilege_gate);

        Box::pin(async move {
            let label = binding.route.privilege_label(req.ctx.role.as_deref());
            if let Err(rejection) = gate.authorize(label, &req).await {
                warn!(
                    service = %binding.base_path,
                    label,
                    role = ?req.ctx.role,
                    reason = %rejection,
                    "privilege check failed"
                );
                return Err(RouteError::Unauthorized(rejection.0));
            }
            inner.call(req).await
        })
    }
}

// ---------------------------------------------------------------------------
// VisibilityLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VisibilityLayer {
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl VisibilityLayer {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>, config: Arc<PipelineConfig>) -> Self {
        Self { binding, config }
    }
}

impl<S> Layer<S> for VisibilityLayer {
    type Service = VisibilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        VisibilityService {
            inner,
            binding: Arc::clone(&self.binding),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisibilityService<S> {
    inner: S,
    binding: Arc<RouteBinding>,
    config: Arc<PipelineConfig>,
}

impl<S> Service<RouteRequest> for VisibilityService<S>
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
        let declared = self.binding.route.visibility.as_ref();
        if !self
            .config
            .visibility_gate
            .permits(declared, req.ctx.mode.as_deref())
        {
            warn!(
                service = %self.binding.base_path,
                path = %self.binding.route.path,
                mode = ?req.ctx.mode,
                "route not visible to caller mode"
            );
            return Box::pin(async { Err(RouteError::Forbidden) });
        }
        Box::pin(self.inner.call(req))
    }
}
