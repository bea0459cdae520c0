//! Routes transport messages to event handler pipelines.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};

use pipewright_core::{decode, ChangeType, EventContext, RawMessage};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, info_span, warn, Instrument};

use super::delivery::{EventCall, EventDelivery, EventError, EventFuture, EventOutcome};
use super::idempotency::IdempotencyLayer;
use super::staleness::StalenessLayer;
use super::subscription::{EventHandler, EventSubscription};
use crate::service::config::PipelineConfig;
use crate::service::definition::ServiceDefinition;
use crate::storage::SharedStore;

type EventPipeline = BoxCloneSyncService<EventCall, EventOutcome, EventError>;

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Terminal event service wrapping an [`EventHandler`].
#[derive(Clone)]
struct HandlerService {
    handler: Arc<dyn EventHandler>,
}

impl Service<EventCall> for HandlerService {
    type Response = EventOutcome;
    type Error = EventError;
    type Future = EventFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: EventCall) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            handler.handle(call).await?;
            Ok(EventOutcome::Handled)
        })
    }
}

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

struct EventFunction {
    topic: String,
    subscription: EventSubscription,
    pipeline: EventPipeline,
}

/// All event functions of the registered services, by function name.
///
/// Each function runs `staleness -> idempotency -> handler`; the first two
/// stages are present only when a max age is known and the subscription
/// asked for idempotency.
pub struct EventDispatcher {
    functions: HashMap<String, EventFunction>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new<'a>(
        services: impl IntoIterator<Item = &'a ServiceDefinition>,
        store: &SharedStore,
        config: &PipelineConfig,
    ) -> Self {
        let mut functions = HashMap::new();
        for service in services {
            for subscription in &service.events {
                let name = subscription.function_name(&service.base_path);
                let max_age_ms = subscription
                    .max_age_ms
                    .or(service.max_age_ms)
                    .or(config.max_age_ms);
                let slot = match functions.entry(name) {
                    Entry::Occupied(taken) => {
                        warn!(
                            function = %taken.key(),
                            service = %service.base_path,
                            "event function name already registered, subscription ignored"
                        );
                        continue;
                    }
                    Entry::Vacant(slot) => slot,
                };
                let pipeline = build_event_pipeline(subscription, max_age_ms, store);
                debug!(function = %slot.key(), ?max_age_ms, "event function registered");
                slot.insert(EventFunction {
                    topic: subscription.topic.clone(),
                    subscription: subscription.clone(),
                    pipeline,
                });
            }
        }
        Self { functions }
    }

    /// Registered function names, sorted.
    #[must_use]
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Decodes `message` and runs it through the pipeline of `function_name`.
    ///
    /// # Errors
    ///
    /// Returns decode, store and handler failures; the transport should
    /// redeliver the message.
    pub async fn deliver(
        &self,
        function_name: &str,
        message: &RawMessage,
        context: EventContext,
    ) -> Result<EventOutcome, EventError> {
        let function = self
            .functions
            .get(function_name)
            .ok_or_else(|| EventError::UnknownFunction(function_name.to_string()))?;
        let result = match decode(message) {
            Ok(envelope) => {
                let delivery = EventDelivery {
                    function_name: function_name.to_string(),
                    envelope,
                    context,
                };
                run(function, delivery).await
            }
            Err(e) => Err(EventError::from(e)),
        };
        record(function_name, &result);
        result
    }

    /// Delivers `message` to every function subscribed to `topic` whose
    /// event type matches, returning each function's result.
    ///
    /// # Errors
    ///
    /// Fails only if the message cannot be decoded; handler failures are
    /// reported per function.
    pub async fn publish(
        &self,
        topic: &str,
        message: &RawMessage,
        context: EventContext,
    ) -> Result<Vec<(String, Result<EventOutcome, EventError>)>, EventError> {
        let envelope = decode(message)?;
        let change_type = envelope.change_type.map(ChangeType::as_str);

        let mut names: Vec<&String> = self
            .functions
            .iter()
            .filter(|(_, f)| f.topic == topic && f.subscription.accepts(change_type))
            .map(|(name, _)| name)
            .collect();
        names.sort();

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let function = &self.functions[name];
            let delivery = EventDelivery {
                function_name: name.clone(),
                envelope: envelope.clone(),
                context: context.clone(),
            };
            let result = run(function, delivery).await;
            record(name, &result);
            results.push((name.clone(), result));
        }
        Ok(results)
    }
}

async fn run(function: &EventFunction, delivery: EventDelivery) -> Result<EventOutcome, EventError> {
    let span = info_span!(
        "event",
        function = %delivery.function_name,
        event_id = %delivery.event_id(),
    );
    function
        .pipeline
        .clone()
        .oneshot(EventCall::new(delivery))
        .instrument(span)
        .await
}

fn record(function: &str, result: &Result<EventOutcome, EventError>) {
    let outcome = match result {
        Ok(outcome) => outcome.as_str(),
        Err(e) => {
            warn!(function, error = %e, "event processing failed");
            e.kind()
        }
    };
    metrics::counter!(
        "pipewright_events_total",
        "function" => function.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

fn build_event_pipeline(
    subscription: &EventSubscription,
    max_age_ms: Option<u64>,
    store: &SharedStore,
) -> EventPipeline {
    let mut pipeline = EventPipeline::new(HandlerService {
        handler: Arc::clone(&subscription.handler),
    });
    if subscription.ensure_idempotent {
        pipeline = EventPipeline::new(IdempotencyLayer::new(SharedStore::clone(store)).layer(pipeline));
    }
    if let Some(max_age_ms) = max_age_ms {
        pipeline = EventPipeline::new(StalenessLayer::new(max_age_ms).layer(pipeline));
    }
    pipeline
}
