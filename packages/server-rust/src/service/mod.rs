//! Route definitions and the request pipeline built from them.
//!
//! 1. **Definitions** (`definition`): services, routes and their schemas
//! 2. **Registry** (`registry`): registration, schema checks, pipeline compilation
//! 3. **Middleware** (`middleware`): Tower layers (trace, gates, payload, response filter)
//! 4. **Routing** (`router`): handler selection by caller role
//! 5. **Access** (`privilege`, `visibility`): who may call a route and in which mode
//! 6. **Background workers** (`worker`): Periodic tasks (idempotency retention)

pub mod config;
pub mod definition;
pub mod handler;
pub mod middleware;
pub mod privilege;
pub mod registry;
pub mod request;
pub mod router;
pub mod selector;
pub mod visibility;
pub mod worker;

// Re-export key types for convenient access.
pub use config::PipelineConfig;
pub use definition::{Route, RouteBinding, ServiceDefinition};
pub use handler::{FnHandler, HandlerError, HandlerResult, RouteHandler};
pub use middleware::{build_route_pipeline, RoutePipeline};
pub use privilege::{
    AccessClaims, AllowAll, IdentityService, JwtIdentityService, Membership, PrivilegeGate,
    TokenPrivilegeGate, Unauthorized,
};
pub use registry::{CompiledRoute, RegisteredService, ServiceRegistry};
pub use request::{HandlerResponse, RouteError, RouteRequest};
pub use router::RoleRouter;
pub use selector::{HandlerSelector, ANY_ROLE};
pub use visibility::{ModeVisibilityGate, VisibilityGate};
pub use worker::{BackgroundRunnable, BackgroundWorker};
