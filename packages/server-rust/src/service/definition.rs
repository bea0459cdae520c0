//! Declarative service definitions.
//!
//! A [`ServiceDefinition`] names the schemas and entry points of one service.
//! Registering it with a [`super::registry::ServiceRegistry`] checks the
//! schemas and compiles one pipeline per route.

use std::fmt;
use std::sync::Arc;

use pipewright_core::{Method, Schema, UnwrapResponse, Visibility};

use super::selector::{HandlerSelector, ANY_ROLE};
use crate::events::EventSubscription;

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// One HTTP entry point of a service.
#[derive(Clone)]
pub struct Route {
    /// Path relative to the service, axum syntax (`/{uid}/items`).
    pub path: String,
    pub method: http::Method,
    pub selector: HandlerSelector,
    /// Privilege label checked for single-handler routes.
    pub privilege: String,
    /// Skip the mutation pipeline and hand the raw body to the handler.
    pub ignore_body: bool,
    /// Replaces the service schema for validation.
    pub schema: Option<Arc<Schema>>,
    pub visibility: Option<Visibility>,
    pub unwrap: Option<Arc<dyn UnwrapResponse>>,
}

impl Route {
    #[must_use]
    pub fn new(method: http::Method, path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self {
            path: path.into(),
            method,
            selector,
            privilege: ANY_ROLE.to_string(),
            ignore_body: false,
            schema: None,
            visibility: None,
            unwrap: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self::new(http::Method::GET, path, selector)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self::new(http::Method::POST, path, selector)
    }

    #[must_use]
    pub fn put(path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self::new(http::Method::PUT, path, selector)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self::new(http::Method::PATCH, path, selector)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>, selector: HandlerSelector) -> Self {
        Self::new(http::Method::DELETE, path, selector)
    }

    #[must_use]
    pub fn privilege(mut self, label: impl Into<String>) -> Self {
        self.privilege = label.into();
        self
    }

    #[must_use]
    pub fn ignore_body(mut self) -> Self {
        self.ignore_body = true;
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: impl Into<Visibility>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    #[must_use]
    pub fn unwrap_with(mut self, adapter: impl UnwrapResponse + 'static) -> Self {
        self.unwrap = Some(Arc::new(adapter));
        self
    }

    /// Label the privilege gate checks for a caller with `role`.
    ///
    /// Role-mapped routes check the caller's own role; single-handler routes
    /// check the declared label.
    #[must_use]
    pub fn privilege_label<'a>(&'a self, role: Option<&'a str>) -> &'a str {
        if self.selector.is_role_based() {
            role.unwrap_or(ANY_ROLE)
        } else {
            &self.privilege
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("selector", &self.selector)
            .field("privilege", &self.privilege)
            .field("ignore_body", &self.ignore_body)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// Schemas, routes and event subscriptions of one service.
#[derive(Clone, Default)]
pub struct ServiceDefinition {
    pub base_path: String,
    pub schema: Option<Arc<Schema>>,
    /// Validation schema for creates, when it differs from `schema`.
    pub post_schema: Option<Arc<Schema>>,
    pub with_modifiers: bool,
    pub routes: Vec<Route>,
    pub events: Vec<EventSubscription>,
    pub max_age_ms: Option<u64>,
    /// Adds `GET /heartbeat`.
    pub keep_alive: bool,
    /// Topic that document changes of this service are published to.
    pub publish_changes: Option<String>,
}

impl ServiceDefinition {
    #[must_use]
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into().trim_matches('/').to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn post_schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.post_schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_modifiers(mut self) -> Self {
        self.with_modifiers = true;
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn event(mut self, subscription: EventSubscription) -> Self {
        self.events.push(subscription);
        self
    }

    #[must_use]
    pub fn max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    #[must_use]
    pub fn keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    #[must_use]
    pub fn publish_changes(mut self, topic: impl Into<String>) -> Self {
        self.publish_changes = Some(topic.into());
        self
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("base_path", &self.base_path)
            .field("has_schema", &self.schema.is_some())
            .field("has_post_schema", &self.post_schema.is_some())
            .field("with_modifiers", &self.with_modifiers)
            .field("routes", &self.routes)
            .field("events", &self.events.len())
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RouteBinding
// ---------------------------------------------------------------------------

/// A route together with the service-level settings its pipeline needs.
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub base_path: String,
    pub route: Route,
    pub schema: Option<Arc<Schema>>,
    pub post_schema: Option<Arc<Schema>>,
    pub with_modifiers: bool,
}

impl RouteBinding {
    #[must_use]
    pub fn new(service: &ServiceDefinition, route: Route) -> Self {
        Self {
            base_path: service.base_path.clone(),
            route,
            schema: service.schema.clone(),
            post_schema: service.post_schema.clone(),
            with_modifiers: service.with_modifiers,
        }
    }

    /// Schema a payload is validated against.
    ///
    /// Creates prefer the route schema, then the post schema; updates prefer
    /// the route schema. Both fall back to the service schema.
    #[must_use]
    pub fn validation_schema(&self, method: Method) -> Option<&Schema> {
        let post = match method {
            Method::Create => self.post_schema.as_deref(),
            _ => None,
        };
        self.route
            .schema
            .as_deref()
            .or(post)
            .or(self.schema.as_deref())
    }

    /// Schema whose write modifiers run, if the service opted in.
    #[must_use]
    pub fn modifier_schema(&self, method: Method) -> Option<&Schema> {
        if !self.with_modifiers {
            return None;
        }
        match method {
            Method::Create => self.post_schema.as_deref().or(self.schema.as_deref()),
            _ => self.schema.as_deref(),
        }
    }

    /// Schema used for defaults and response filtering.
    #[must_use]
    pub fn service_schema(&self) -> Option<&Schema> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn unwrap_adapter(&self) -> Option<&Arc<dyn UnwrapResponse>> {
        self.route.unwrap.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use pipewright_core::{FieldRule, ValueKind};

    use super::*;
    use crate::service::handler::{FnHandler, HandlerError};
    use crate::service::request::RouteRequest;

    fn noop() -> HandlerSelector {
        HandlerSelector::single(FnHandler(|_req: RouteRequest| async {
            Ok::<_, HandlerError>(None)
        }))
    }

    fn schema(field: &str) -> Schema {
        Schema::builder()
            .field(field, FieldRule::new(ValueKind::String))
            .build()
    }

    #[test]
    fn create_prefers_route_then_post_schema() {
        let service = ServiceDefinition::new("/contacts/")
            .schema(schema("service"))
            .post_schema(schema("post"));
        assert_eq!(service.base_path, "contacts");

        let plain = RouteBinding::new(&service, Route::post("/", noop()));
        assert!(plain.validation_schema(Method::Create).unwrap().get("post").is_some());
        assert!(plain.validation_schema(Method::Update).unwrap().get("service").is_some());

        let routed = RouteBinding::new(&service, Route::post("/", noop()).schema(schema("route")));
        assert!(routed.validation_schema(Method::Create).unwrap().get("route").is_some());
        assert!(routed.validation_schema(Method::Update).unwrap().get("route").is_some());
    }

    #[test]
    fn modifiers_need_opt_in() {
        let service = ServiceDefinition::new("contacts").schema(schema("service"));
        let binding = RouteBinding::new(&service, Route::post("/", noop()));
        assert!(binding.modifier_schema(Method::Create).is_none());

        let service = service.post_schema(schema("post")).with_modifiers();
        let binding = RouteBinding::new(&service, Route::post("/", noop()));
        assert!(binding.modifier_schema(Method::Create).unwrap().get("post").is_some());
        assert!(binding.modifier_schema(Method::Update).unwrap().get("service").is_some());
    }

    #[test]
    fn privilege_label_follows_selector() {
        let fixed = Route::get("/", noop()).privilege("member");
        assert_eq!(fixed.privilege_label(Some("admin")), "member");
        assert_eq!(Route::get("/", noop()).privilege_label(None), "any");

        let by_role = Route::get("/", HandlerSelector::by_role());
        assert_eq!(by_role.privilege_label(Some("admin")), "admin");
        assert_eq!(by_role.privilege_label(None), "any");
    }
}
