//! Completion records for idempotent event handlers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::StoreError;

/// Collection holding one record per `(handler, event)`.
pub const IDEMPOTENCY_COLLECTION: &str = "idempotency";

/// Identifies one event as seen by one handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub handler_name: String,
    pub event_id: String,
}

impl IdempotencyKey {
    #[must_use]
    pub fn new(handler_name: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            event_id: event_id.into(),
        }
    }

    /// Document id inside [`IDEMPOTENCY_COLLECTION`]: `<handler>-<event>`.
    #[must_use]
    pub fn doc_id(&self) -> String {
        format!("{}-{}", self.handler_name, self.event_id)
    }
}

/// Marker proving an event was fully processed by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub completed: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl IdempotencyRecord {
    /// A completed record stamped with the current time.
    #[must_use]
    pub fn completed_now() -> Self {
        Self {
            completed: true,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if the document is not a record.
    pub fn from_document(document: Value) -> Result<Self, StoreError> {
        serde_json::from_value(document).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] if serialization fails.
    pub fn to_document(&self) -> Result<Value, StoreError> {
        serde_json::to_value(self).map_err(|e| StoreError::Codec(e.to_string()))
    }
}
