//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::caller::CallerLayer;
use super::gate::{PrivilegeLayer, VisibilityLayer};
use super::payload::PayloadLayer;
use super::response::ResponseVisibilityLayer;
use super::trace::TraceLayer;
use crate::service::config::PipelineConfig;
use crate::service::definition::RouteBinding;
use crate::service::request::{HandlerResponse, RouteError, RouteRequest};
use crate::service::router::RoleRouter;

/// Type-erased pipeline of one route.
pub type RoutePipeline = BoxCloneSyncService<RouteRequest, HandlerResponse, RouteError>;

/// Build the pipeline of one route by wrapping its `RoleRouter` with
/// middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `TraceLayer` -- span, timing and request counter for the whole call
/// 2. `CallerLayer` -- role and mode from headers
/// 3. `PrivilegeLayer` -- may this caller invoke the route at all
/// 4. `VisibilityLayer` -- is the route visible in the caller's mode
/// 5. `PayloadLayer` -- validate, default and modify the body
/// 6. `ResponseVisibilityLayer` -- filter the handler's response fields
#[must_use]
pub fn build_route_pipeline(binding: Arc<RouteBinding>, config: &Arc<PipelineConfig>) -> RoutePipeline {
    let service = ServiceBuilder::new()
        .layer(TraceLayer::new(Arc::clone(&binding)))
        .layer(CallerLayer::new(Arc::clone(config)))
        .layer(PrivilegeLayer::new(Arc::clone(&binding), Arc::clone(config)))
        .layer(VisibilityLayer::new(Arc::clone(&binding), Arc::clone(config)))
        .layer(PayloadLayer::new(Arc::clone(&binding)))
        .layer(ResponseVisibilityLayer::new(Arc::clone(&binding), Arc::clone(config)))
        .service(RoleRouter::new(binding));
    BoxCloneSyncService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
