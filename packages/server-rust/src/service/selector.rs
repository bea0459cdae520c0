//! Handler selection by caller role.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::RouteHandler;

/// Role name whose handler serves callers with no matching role.
pub const ANY_ROLE: &str = "any";

/// Which handler a route runs for a caller.
#[derive(Clone)]
pub enum HandlerSelector {
    /// One handler, open to every caller.
    Single(Arc<dyn RouteHandler>),
    /// A handler per role, with an optional fallback.
    ByRole {
        handlers: HashMap<String, Arc<dyn RouteHandler>>,
        fallback: Option<Arc<dyn RouteHandler>>,
    },
}

impl HandlerSelector {
    pub fn single(handler: impl RouteHandler + 'static) -> Self {
        Self::Single(Arc::new(handler))
    }

    /// Empty role map; add variants with [`HandlerSelector::role`].
    #[must_use]
    pub fn by_role() -> Self {
        Self::ByRole {
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    /// Adds a handler for `role`. A role named [`ANY_ROLE`] sets the fallback.
    /// Has no effect on a `Single` selector.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>, handler: impl RouteHandler + 'static) -> Self {
        if let Self::ByRole { handlers, fallback } = &mut self {
            let role = role.into();
            let handler: Arc<dyn RouteHandler> = Arc::new(handler);
            if role == ANY_ROLE {
                *fallback = Some(handler);
            } else {
                handlers.insert(role, handler);
            }
        }
        self
    }

    /// Returns the handler for `role`: exact match, then the fallback.
    ///
    /// `None` means the route has no handler this caller may run.
    #[must_use]
    pub fn resolve(&self, role: Option<&str>) -> Option<Arc<dyn RouteHandler>> {
        match self {
            Self::Single(handler) => Some(Arc::clone(handler)),
            Self::ByRole { handlers, fallback } => role
                .and_then(|r| handlers.get(r))
                .or(fallback.as_ref())
                .cloned(),
        }
    }

    #[must_use]
    pub fn is_role_based(&self) -> bool {
        matches!(self, Self::ByRole { .. })
    }
}

impl fmt::Debug for HandlerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Single"),
            Self::ByRole { handlers, fallback } => {
                let mut roles: Vec<_> = handlers.keys().collect();
                roles.sort();
                f.debug_struct("ByRole")
                    .field("roles", &roles)
                    .field("fallback", &fallback.is_some())
                    .finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::service::handler::{FnHandler, HandlerError};
    use crate::service::request::{HandlerResponse, RouteRequest};

    fn tagged(tag: &'static str) -> impl RouteHandler {
        FnHandler(move |_req: RouteRequest| async move {
            Ok::<_, HandlerError>(Some(HandlerResponse::new(StatusCode::OK, json!(tag))))
        })
    }

    async fn run(selector: &HandlerSelector, role: Option<&str>) -> Option<serde_json::Value> {
        let handler = selector.resolve(role)?;
        handler
            .handle(RouteRequest::new(http::Method::GET, "/"))
            .await
            .unwrap()
            .and_then(|r| r.body)
    }

    #[tokio::test]
    async fn role_match_wins_over_fallback() {
        let selector = HandlerSelector::by_role()
            .role("admin", tagged("admin"))
            .role(ANY_ROLE, tagged("any"));
        assert_eq!(run(&selector, Some("admin")).await, Some(json!("admin")));
        assert_eq!(run(&selector, Some("viewer")).await, Some(json!("any")));
        assert_eq!(run(&selector, None).await, Some(json!("any")));
    }

    #[test]
    fn unmatched_role_without_fallback_has_no_handler() {
        let selector = HandlerSelector::by_role().role("admin", tagged("admin"));
        assert!(selector.resolve(Some("viewer")).is_none());
        assert!(selector.resolve(None).is_none());
    }

    #[tokio::test]
    async fn single_handler_serves_everyone() {
        let selector = HandlerSelector::single(tagged("only"));
        assert_eq!(run(&selector, Some("anything")).await, Some(json!("only")));
        assert!(!selector.is_role_based());
    }
}
