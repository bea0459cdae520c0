//! Route-level visibility: which caller modes may reach a route at all.

use pipewright_core::{is_visible, Visibility};

/// Decides whether a caller in `mode` may reach a route declaring `declared`.
pub trait VisibilityGate: Send + Sync {
    fn permits(&self, declared: Option<&Visibility>, mode: Option<&str>) -> bool;
}

/// Compares the caller's mode with the route's declared modes.
///
/// Callers without a mode are never rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeVisibilityGate;

impl VisibilityGate for ModeVisibilityGate {
    fn permits(&self, declared: Option<&Visibility>, mode: Option<&str>) -> bool {
        mode.map_or(true, |mode| is_visible(declared, mode))
    }
}
