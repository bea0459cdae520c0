//! At-most-once guard for event handlers.
//!
//! Before the handler runs, the guard looks up the completion record of
//! `(function, event id)`. A completed record short-circuits the call;
//! otherwise the handler receives a [`CommitHandle`] to mark the event done,
//! either directly or inside its own store transaction.
//!
//! Two concurrent deliveries of the same event may both find no record and
//! both run the handler. Handlers that commit through
//! [`CommitHandle::mark_complete_in`] after reading the record inside their
//! transaction get a [`StoreError::Conflict`] on the losing side.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{debug, info};

use super::delivery::{EventCall, EventError, EventFuture, EventOutcome};
use crate::storage::{
    IdempotencyKey, IdempotencyRecord, SharedStore, StoreError, Transaction,
    IDEMPOTENCY_COLLECTION,
};

// ---------------------------------------------------------------------------
// CommitHandle
// ---------------------------------------------------------------------------

/// Marks one event as fully processed by one handler.
#[derive(Clone)]
pub struct CommitHandle {
    store: SharedStore,
    key: IdempotencyKey,
}

impl CommitHandle {
    #[must_use]
    pub fn new(store: SharedStore, key: IdempotencyKey) -> Self {
        Self { store, key }
    }

    #[must_use]
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    /// Writes the completion record immediately.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn mark_complete(&self) -> Result<(), StoreError> {
        let record = IdempotencyRecord::completed_now().to_document()?;
        self.store
            .store(IDEMPOTENCY_COLLECTION, &self.key.doc_id(), record)
            .await
    }

    /// Reads the completion record inside `tx`, so that a concurrent
    /// completion of the same event makes `tx` conflict. Returns `true` if
    /// the event is already complete.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn is_complete_in(&self, tx: &mut Transaction) -> Result<bool, StoreError> {
        match tx.get(IDEMPOTENCY_COLLECTION, &self.key.doc_id()).await? {
            Some(document) => Ok(IdempotencyRecord::from_document(document)?.completed),
            None => Ok(false),
        }
    }

    /// Stages the completion record in `tx`; it lands when `tx` commits.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the record cannot be encoded.
    pub fn mark_complete_in(&self, tx: &mut Transaction) -> Result<(), StoreError> {
        let record = IdempotencyRecord::completed_now().to_document()?;
        tx.set(IDEMPOTENCY_COLLECTION, &self.key.doc_id(), record);
        Ok(())
    }
}

impl std::fmt::Debug for CommitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitHandle").field("key", &self.key).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// IdempotencyLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct IdempotencyLayer {
    store: SharedStore,
}

impl IdempotencyLayer {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for IdempotencyLayer {
    type Service = IdempotencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdempotencyService {
            inner,
            store: SharedStore::clone(&self.store),
        }
    }
}

// ---------------------------------------------------------------------------
// IdempotencyService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct IdempotencyService<S> {
    inner: S,
    store: SharedStore,
}

impl<S> Service<EventCall> for IdempotencyService<S>
where
    S: Service<EventCall, Response = EventOutcome, Error = EventError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = EventOutcome;
    type Error = EventError;
    type Future = EventFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut call: EventCall) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let store = SharedStore::clone(&self.store);

        Box::pin(async move {
            let event_id = call.delivery.event_id().to_string();
            let key = IdempotencyKey::new(call.delivery.function_name.clone(), event_id.clone());

            if let Some(document) = store.load(IDEMPOTENCY_COLLECTION, &key.doc_id()).await? {
                match IdempotencyRecord::from_document(document) {
                    Ok(record) if record.completed => {
                        info!(
                            function = %key.handler_name,
                            "prevented event {event_id} from being processed more than once"
                        );
                        return Ok(EventOutcome::DuplicateSuppressed);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(doc = %key.doc_id(), error = %e, "ignoring unreadable idempotency record"),
                }
            }

            call.commit = Some(CommitHandle::new(store, key));
            inner.call(call).await
        })
    }
}
