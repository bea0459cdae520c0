//! Pipewright server: declarative services over HTTP, guarded event
//! handlers, document storage and the axum surface that hosts them.

pub mod events;
pub mod network;
pub mod sample;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use events::{ChangeRelay, EventDispatcher, EventSubscription};
pub use network::{NetworkConfig, NetworkModule};
pub use service::{PipelineConfig, Route, ServiceDefinition, ServiceRegistry};
pub use storage::{DocumentStore, SharedStore};
