use std::fmt;
use std::sync::Arc;

use pipewright_core::{UnwrapResponse, WholeResponse};

use super::privilege::{AllowAll, PrivilegeGate};
use super::visibility::{ModeVisibilityGate, VisibilityGate};

/// Header naming the caller's role.
pub const DEFAULT_ROLE_HEADER: &str = "role";
/// Header naming the caller's audience mode.
pub const DEFAULT_MODE_HEADER: &str = "mode";

/// Process-wide pipeline collaborators.
///
/// Built once with [`PipelineConfig::builder`] before any service is
/// registered and shared as `Arc<PipelineConfig>`; there is no way to
/// change it afterwards.
#[derive(Clone)]
pub struct PipelineConfig {
    pub privilege_gate: Arc<dyn PrivilegeGate>,
    pub visibility_gate: Arc<dyn VisibilityGate>,
    /// Adapter used by routes that do not declare their own.
    pub unwrap: Arc<dyn UnwrapResponse>,
    pub role_header: String,
    pub mode_header: String,
    /// Staleness horizon for events whose subscription and service set none.
    pub max_age_ms: Option<u64>,
}

impl PipelineConfig {
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            privilege_gate: Arc::new(AllowAll),
            visibility_gate: Arc::new(ModeVisibilityGate),
            unwrap: Arc::new(WholeResponse),
            role_header: DEFAULT_ROLE_HEADER.to_string(),
            mode_header: DEFAULT_MODE_HEADER.to_string(),
            max_age_ms: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("role_header", &self.role_header)
            .field("mode_header", &self.mode_header)
            .field("max_age_ms", &self.max_age_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn privilege_gate(mut self, gate: impl PrivilegeGate + 'static) -> Self {
        self.config.privilege_gate = Arc::new(gate);
        self
    }

    #[must_use]
    pub fn visibility_gate(mut self, gate: impl VisibilityGate + 'static) -> Self {
        self.config.visibility_gate = Arc::new(gate);
        self
    }

    #[must_use]
    pub fn unwrap(mut self, adapter: impl UnwrapResponse + 'static) -> Self {
        self.config.unwrap = Arc::new(adapter);
        self
    }

    #[must_use]
    pub fn role_header(mut self, name: impl Into<String>) -> Self {
        self.config.role_header = name.into();
        self
    }

    #[must_use]
    pub fn mode_header(mut self, name: impl Into<String>) -> Self {
        self.config.mode_header = name.into();
        self
    }

    #[must_use]
    pub fn max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.config.max_age_ms = Some(max_age_ms);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<PipelineConfig> {
        Arc::new(self.config)
    }
}
