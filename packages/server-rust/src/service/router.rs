//! Terminal route service: picks the handler variant for the caller's role
//! and runs it.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::warn;

use super::definition::RouteBinding;
use super::middleware::RouteFuture;
use super::request::{HandlerResponse, RouteError, RouteRequest};

/// Dispatches a prepared request to the handler chosen by
/// [`HandlerSelector::resolve`](super::selector::HandlerSelector::resolve).
///
/// A caller whose role matches no variant, on a route without an `any`
/// fallback, gets [`RouteError::NoHandlerForRole`]. A handler returning
/// nothing produces an empty 200.
#[derive(Debug, Clone)]
pub struct RoleRouter {
    binding: Arc<RouteBinding>,
}

impl RoleRouter {
    #[must_use]
    pub fn new(binding: Arc<RouteBinding>) -> Self {
        Self { binding }
    }
}

impl Service<RouteRequest> for RoleRouter {
    type Response = HandlerResponse;
    type Error = RouteError;
    type Future = RouteFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RouteRequest) -> Self::Future {
        let selected = self.binding.route.selector.resolve(req.ctx.role.as_deref());
        let Some(handler) = selected else {
            warn!(
                service = %self.binding.base_path,
                path = %self.binding.route.path,
                role = ?req.ctx.role,
                "no handler for caller role"
            );
            return Box::pin(async { Err(RouteError::NoHandlerForRole) });
        };

        Box::pin(async move {
            let response = handler.handle(req).await?;
            Ok(response.unwrap_or_else(HandlerResponse::empty))
        })
    }
}
