//! Event handlers and the subscriptions binding them to topics.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::delivery::EventCall;

/// Business logic behind an event subscription.
///
/// For idempotent subscriptions `call.commit` carries the handle that marks
/// the event done; a handler that never marks it will see the event again on
/// redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, call: EventCall) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnEventHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(EventCall) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, call: EventCall) -> anyhow::Result<()> {
        (self.0)(call).await
    }
}

/// A handler subscribed to a topic.
#[derive(Clone)]
pub struct EventSubscription {
    pub topic: String,
    /// Optional change type (`create`, `update`, `delete`) the handler is
    /// limited to.
    pub event_type: Option<String>,
    pub handler: Arc<dyn EventHandler>,
    pub ensure_idempotent: bool,
    pub max_age_ms: Option<u64>,
}

impl EventSubscription {
    #[must_use]
    pub fn new(topic: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        Self {
            topic: topic.into(),
            event_type: None,
            handler: Arc::new(handler),
            ensure_idempotent: false,
            max_age_ms: None,
        }
    }

    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn ensure_idempotent(mut self) -> Self {
        self.ensure_idempotent = true;
        self
    }

    #[must_use]
    pub fn max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    /// `<basePath>_<topic>[_<type>]`.
    #[must_use]
    pub fn function_name(&self, base_path: &str) -> String {
        match &self.event_type {
            Some(event_type) => format!("{base_path}_{}_{event_type}", self.topic),
            None => format!("{base_path}_{}", self.topic),
        }
    }

    /// Whether an event of `change_type` (if known) should reach this handler.
    #[must_use]
    pub fn accepts(&self, change_type: Option<&str>) -> bool {
        match (&self.event_type, change_type) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("topic", &self.topic)
            .field("event_type", &self.event_type)
            .field("ensure_idempotent", &self.ensure_idempotent)
            .field("max_age_ms", &self.max_age_ms)
            .finish_non_exhaustive()
    }
}
