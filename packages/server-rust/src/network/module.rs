//! HTTP server lifecycle: build the router, bind, serve, drain.
//!
//! `new()` takes the registry and dispatcher, `start()` binds the listener
//! and `serve()` runs until the shutdown future resolves. Each registered
//! service is mounted twice, under `/<base_path>` and at `/`; when two
//! services claim the same root route the first registration wins.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::handler::Handler;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use http::Method;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    health_handler, heartbeat_handler, liveness_handler, publish_handler, push_handler,
    readiness_handler, serve_route, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::events::EventDispatcher;
use crate::service::{RegisteredService, ServiceRegistry};

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// Collects method routers per path, skipping `(path, method)` pairs that
/// are already taken instead of letting axum panic on the overlap.
#[derive(Default)]
struct RouteTable {
    paths: BTreeMap<String, MethodRouter<AppState>>,
    taken: HashSet<(String, Method)>,
}

impl RouteTable {
    fn add<H, T>(&mut self, path: String, method: &Method, handler: H) -> bool
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        let Ok(filter) = MethodFilter::try_from(method.clone()) else {
            warn!(%path, %method, "unsupported method, route not mounted");
            return false;
        };
        if !self.taken.insert((path.clone(), method.clone())) {
            debug!(%path, %method, "route already mounted");
            return false;
        }
        let existing = self.paths.remove(&path).unwrap_or_else(MethodRouter::new);
        self.paths.insert(path, existing.on(filter, handler));
        true
    }

    fn add_service(&mut self, service: &RegisteredService) {
        let base = service.base_path();
        let mut prefixes = vec![String::new()];
        if !base.is_empty() {
            prefixes.insert(0, format!("/{base}"));
        }

        for prefix in &prefixes {
            if service.definition.keep_alive {
                self.add(mount_path(prefix, "/heartbeat"), &Method::GET, heartbeat_handler);
            }
            for route in &service.routes {
                let path = mount_path(prefix, &route.path);
                let pipeline = route.pipeline.clone();
                let handler = move |state: State<AppState>,
                                    params: Path<HashMap<String, String>>,
                                    request: Request| {
                    serve_route(pipeline.clone(), state, params, request)
                };
                if !self.add(path.clone(), &route.method, handler) && !prefix.is_empty() {
                    warn!(service = base, %path, method = %route.method, "duplicate route ignored");
                }
            }
        }
        info!(service = base, routes = service.routes.len(), "service mounted");
    }

    fn into_router(self) -> Router<AppState> {
        self.paths
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
    }
}

/// `prefix` + `path`, with `/` standing for the prefix itself.
fn mount_path(prefix: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

/// Assembles the full router: probes, event endpoints and every service.
pub fn build_router(state: AppState) -> Router {
    let mut table = RouteTable::default();
    table.add("/health".to_string(), &Method::GET, health_handler);
    table.add("/health/live".to_string(), &Method::GET, liveness_handler);
    table.add("/health/ready".to_string(), &Method::GET, readiness_handler);
    table.add("/events/{function}".to_string(), &Method::POST, push_handler);
    table.add("/topics/{topic}".to_string(), &Method::POST, publish_handler);
    for service in state.registry.services() {
        table.add_service(&service);
    }

    let layers = build_http_layers(&state.config);
    table
        .into_router()
        .layer(DefaultBodyLimit::max(state.config.body_limit))
        .layer(layers)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// NetworkModule
// ---------------------------------------------------------------------------

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<EventDispatcher>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        registry: Arc<ServiceRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            listener: None,
            registry,
            dispatcher,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(self.state())
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!("TCP listener bound to {}:{}", self.config.host, port);
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight calls.
    ///
    /// # Errors
    ///
    /// Fails if `start()` was not called or the server hits an I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);
        let drain_timeout = self.config.drain_timeout;

        controller.set_ready();
        info!("serving HTTP");

        let signal = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal.trigger_shutdown();
            })
            .await?;

        controller.trigger_shutdown();
        if !controller.wait_for_drain(drain_timeout).await {
            warn!("Drain timeout expired with in-flight calls remaining");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{PipelineConfig, ServiceDefinition};
    use crate::storage::{MemoryDocumentStore, SharedStore};

    fn module() -> NetworkModule {
        let config = PipelineConfig::builder().build();
        let store: SharedStore = Arc::new(MemoryDocumentStore::new());
        let dispatcher = EventDispatcher::new(Vec::<&ServiceDefinition>::new(), &store, &config);
        let network = NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..NetworkConfig::default()
        };
        NetworkModule::new(
            network,
            Arc::new(ServiceRegistry::new(config)),
            Arc::new(dispatcher),
        )
    }

    #[test]
    fn mount_paths_join_cleanly() {
        assert_eq!(mount_path("/orders", "/"), "/orders");
        assert_eq!(mount_path("/orders", "/{id}"), "/orders/{id}");
        assert_eq!(mount_path("", "/"), "/");
        assert_eq!(mount_path("", "{id}"), "/{id}");
    }

    #[tokio::test]
    async fn start_binds_an_os_assigned_port() {
        let mut module = module();
        let port = module.start().await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn serve_requires_start() {
        let err = module().serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_drains_after_shutdown() {
        let mut module = module();
        module.start().await.unwrap();
        let controller = module.shutdown_controller();
        module.serve(async {}).await.unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Stopped);
    }
}
