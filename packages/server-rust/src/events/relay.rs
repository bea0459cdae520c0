//! Publishes document changes of a service to its change topic.

use std::sync::Arc;

use chrono::Utc;
use pipewright_core::{Change, EventContext, EventEnvelope};
use tracing::debug;

use super::delivery::{EventError, EventOutcome};
use super::dispatcher::EventDispatcher;
use crate::service::definition::ServiceDefinition;

/// Relays document changes to in-process subscribers of a service's
/// `publish_changes` topic.
///
/// Every relayed change gets a fresh event id in its `changeContext`, which
/// the subscribers' idempotency guards key on.
#[derive(Clone)]
pub struct ChangeRelay {
    dispatcher: Arc<EventDispatcher>,
}

impl ChangeRelay {
    #[must_use]
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Publishes `change` if `service` declares a change topic; otherwise
    /// does nothing and returns no results.
    ///
    /// # Errors
    ///
    /// Fails if the envelope cannot be encoded.
    pub async fn relay(
        &self,
        service: &ServiceDefinition,
        change: Change,
    ) -> Result<Vec<(String, Result<EventOutcome, EventError>)>, EventError> {
        let Some(topic) = &service.publish_changes else {
            return Ok(Vec::new());
        };

        let mut context = EventContext::new(uuid::Uuid::new_v4().to_string()).with_timestamp(Utc::now());
        context.resource = Some(service.base_path.clone());

        let message = EventEnvelope::from_change(change, context.clone()).encode()?;
        debug!(topic = %topic, event_id = %context.event_id, "relaying change");
        self.dispatcher.publish(topic, &message, context).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::events::delivery::EventCall;
    use crate::events::subscription::{EventSubscription, FnEventHandler};
    use crate::service::config::PipelineConfig;
    use crate::storage::engines::MemoryDocumentStore;
    use crate::storage::SharedStore;

    #[tokio::test]
    async fn updates_reach_subscribers_with_previous_document() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let audit = ServiceDefinition::new("audit").event(
            EventSubscription::new(
                "contacts-changes",
                FnEventHandler(move |call: EventCall| {
                    let counter = Arc::clone(&counter);
                    async move {
                        assert_eq!(call.delivery.envelope.data_before, Some(json!({"name": "A"})));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    }
                }),
            )
            .event_type("update"),
        );
        let contacts = ServiceDefinition::new("contacts").publish_changes("contacts-changes");

        let store: SharedStore = Arc::new(MemoryDocumentStore::new());
        let dispatcher = EventDispatcher::new([&audit], &store, &PipelineConfig::default());
        let relay = ChangeRelay::new(Arc::new(dispatcher));

        let results = relay
            .relay(
                &contacts,
                Change::Updated {
                    before: json!({"name": "A"}),
                    after: json!({"name": "B"}),
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Ok(EventOutcome::Handled)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        // Creates do not match the update-only subscription.
        let results = relay.relay(&contacts, Change::Created(json!({}))).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn services_without_topic_publish_nothing() {
        let store: SharedStore = Arc::new(MemoryDocumentStore::new());
        let dispatcher = EventDispatcher::new(Vec::<&ServiceDefinition>::new(), &store, &PipelineConfig::default());
        let relay = ChangeRelay::new(Arc::new(dispatcher));
        let results = relay
            .relay(&ServiceDefinition::new("contacts"), Change::Deleted(json!({})))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
