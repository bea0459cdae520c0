//! Values flowing through an event pipeline.

use std::future::Future;
use std::pin::Pin;

use pipewright_core::{DecodeError, EventContext, EventEnvelope};

use super::idempotency::CommitHandle;
use crate::storage::StoreError;

/// A decoded event addressed to one handler.
#[derive(Debug, Clone)]
pub struct EventDelivery {
    /// Name of the receiving function, `<basePath>_<topic>[_<type>]`.
    pub function_name: String,
    pub envelope: EventEnvelope,
    /// Delivery metadata from the transport.
    pub context: EventContext,
}

impl EventDelivery {
    /// Id used to recognise redeliveries: the relayed change's own event id
    /// when present, else the transport's.
    #[must_use]
    pub fn event_id(&self) -> &str {
        self.envelope
            .change_context
            .as_ref()
            .map(|c| c.event_id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.context.event_id)
    }
}

/// One handler invocation. `commit` is set for idempotent subscriptions.
#[derive(Debug)]
pub struct EventCall {
    pub delivery: EventDelivery,
    pub commit: Option<CommitHandle>,
}

impl EventCall {
    #[must_use]
    pub fn new(delivery: EventDelivery) -> Self {
        Self {
            delivery,
            commit: None,
        }
    }
}

/// How an accepted event ended. Every variant is a success for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Handled,
    DuplicateSuppressed,
    StaleDropped,
}

impl EventOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::DuplicateSuppressed => "duplicate",
            Self::StaleDropped => "stale",
        }
    }
}

/// Failures reported back to the transport, which may redeliver.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no event function named {0}")]
    UnknownFunction(String),
}

impl EventError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Handler(_) => "handler",
            Self::Store(_) => "store",
            Self::UnknownFunction(_) => "unknown_function",
        }
    }
}

pub type EventFuture = Pin<Box<dyn Future<Output = Result<EventOutcome, EventError>> + Send>>;
