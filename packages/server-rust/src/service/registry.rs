use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use pipewright_core::{Schema, SchemaDefinitionError};
use tracing::{info, warn};

use super::config::PipelineConfig;
use super::definition::{RouteBinding, ServiceDefinition};
use super::middleware::{build_route_pipeline, RoutePipeline};

// ---------------------------------------------------------------------------
// RegisteredService
// ---------------------------------------------------------------------------

/// A route with its compiled pipeline.
#[derive(Clone)]
pub struct CompiledRoute {
    pub method: http::Method,
    pub path: String,
    pub pipeline: RoutePipeline,
}

/// A service after registration: its definition, compiled routes, and the
/// schema problems found while registering it.
pub struct RegisteredService {
    pub definition: ServiceDefinition,
    pub routes: Vec<CompiledRoute>,
    pub schema_errors: Vec<(&'static str, SchemaDefinitionError)>,
}

impl RegisteredService {
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.definition.base_path
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry of service definitions, keyed by base path.
///
/// Registration checks the service's schemas (failures are logged, not
/// fatal) and compiles one pipeline per route against the shared
/// [`PipelineConfig`]. Services are listed in registration order.
pub struct ServiceRegistry {
    config: Arc<PipelineConfig>,
    by_name: DashMap<String, Arc<RegisteredService>>,
    order: RwLock<Vec<String>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            config,
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    /// Registers a service, replacing any earlier one with the same base path.
    pub fn register(&self, definition: ServiceDefinition) -> Arc<RegisteredService> {
        let schema_errors = check_schemas(&definition);

        let routes = definition
            .routes
            .iter()
            .map(|route| {
                let binding = Arc::new(RouteBinding::new(&definition, route.clone()));
                CompiledRoute {
                    method: route.method.clone(),
                    path: route.path.clone(),
                    pipeline: build_route_pipeline(binding, &self.config),
                }
            })
            .collect();

        let name = definition.base_path.clone();
        let registered = Arc::new(RegisteredService {
            definition,
            routes,
            schema_errors,
        });
        if self
            .by_name
            .insert(name.clone(), Arc::clone(&registered))
            .is_none()
        {
            self.order.write().push(name);
        }
        registered
    }

    #[must_use]
    pub fn get(&self, base_path: &str) -> Option<Arc<RegisteredService>> {
        self.by_name.get(base_path).map(|entry| Arc::clone(entry.value()))
    }

    /// All services in registration order.
    #[must_use]
    pub fn services(&self) -> Vec<Arc<RegisteredService>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }
}

fn check_schemas(definition: &ServiceDefinition) -> Vec<(&'static str, SchemaDefinitionError)> {
    let base = &definition.base_path;
    let declared: Vec<(&'static str, &Schema)> = [
        ("schema", definition.schema.as_deref()),
        ("postSchema", definition.post_schema.as_deref()),
    ]
    .into_iter()
    .filter_map(|(label, schema)| schema.map(|s| (label, s)))
    .collect();

    if declared.is_empty() {
        info!("{base}: no schema provided");
        return Vec::new();
    }

    let mut errors = Vec::new();
    for (label, schema) in declared {
        match schema.check() {
            Ok(()) => info!(which = label, "{base}: Schema validated successfully!"),
            Err(e) => {
                warn!(which = label, error = %e, "{base}: Schema failed validation");
                errors.push((label, e));
            }
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
