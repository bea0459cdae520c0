use std::collections::BTreeMap;

use crate::types::Record;

/// Per-request context carrying the caller's identity class, audience mode,
/// and the raw mutation payload.
///
/// Created once per request or event and handed by reference to every
/// pipeline stage, validators, default computations and write modifiers.
/// Dropped when the pipeline finishes.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Declared role of the caller, used to pick a handler variant.
    pub role: Option<String>,
    /// Audience tag (e.g. `"internal"` / `"external"`) used for field visibility.
    pub mode: Option<String>,
    /// The payload exactly as the caller submitted it, before validation.
    pub payload: Record,
    /// Path parameters extracted by the router (e.g. `uid`, `subdomain`).
    pub params: BTreeMap<String, String>,
    /// Distributed trace identifier for log correlation.
    pub trace_id: String,
}

impl CallerContext {
    /// Creates an anonymous context with no role and no mode.
    #[must_use]
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            ..Self::default()
        }
    }

    /// Sets the role from a list of declared roles. The first entry wins.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role = roles.into_iter().next().map(Into::into);
        self
    }

    /// Sets a single role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Sets the audience mode.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Stores the raw payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Returns a path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
