//! Tower middleware layers for the route pipeline.
//!
//! - [`trace`]: Route span, duration/outcome recording and request counter
//! - [`caller`]: Caller role and mode from request headers
//! - [`gate`]: Privilege (401) and route visibility (403) checks
//! - [`payload`]: Validation, defaults and write modifiers on request bodies
//! - [`response`]: Field-level response filtering by caller mode
//! - [`pipeline`]: Composes all layers into a single service stack

use std::future::Future;
use std::pin::Pin;

use crate::service::request::{HandlerResponse, RouteError};

pub mod caller;
pub mod gate;
pub mod payload;
pub mod pipeline;
pub mod response;
pub mod trace;

/// Boxed future returned by every route-pipeline service.
pub type RouteFuture = Pin<Box<dyn Future<Output = Result<HandlerResponse, RouteError>> + Send>>;

pub use caller::CallerLayer;
pub use gate::{PrivilegeLayer, VisibilityLayer};
pub use payload::PayloadLayer;
pub use pipeline::{build_route_pipeline, RoutePipeline};
pub use response::ResponseVisibilityLayer;
pub use trace::TraceLayer;
