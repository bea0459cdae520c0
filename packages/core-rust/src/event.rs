//! Event envelopes carried over the message bus.
//!
//! A transport message holds base64-encoded JSON. Relayed document changes
//! use the envelope `{type, data, dataBefore?, changeContext?}`; plain
//! messages may carry only `data`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of document change that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Delivery metadata of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl EventContext {
    #[must_use]
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Milliseconds elapsed between the event timestamp and `now`.
    ///
    /// `None` when the event carries no timestamp.
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.timestamp
            .map(|ts| now.signed_duration_since(ts).num_milliseconds())
    }
}

/// A document change observed by a database trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Created(Value),
    Updated { before: Value, after: Value },
    Deleted(Value),
}

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_context: Option<EventContext>,
}

impl EventEnvelope {
    /// Envelope for a plain message with no change metadata.
    #[must_use]
    pub fn message(data: Value) -> Self {
        Self {
            change_type: None,
            data,
            data_before: None,
            change_context: None,
        }
    }

    /// Envelope relaying a document change. Updates carry the previous
    /// document as `dataBefore`.
    #[must_use]
    pub fn from_change(change: Change, change_context: EventContext) -> Self {
        let (change_type, data, data_before) = match change {
            Change::Created(data) => (ChangeType::Create, data, None),
            Change::Updated { before, after } => (ChangeType::Update, after, Some(before)),
            Change::Deleted(data) => (ChangeType::Delete, data, None),
        };
        Self {
            change_type: Some(change_type),
            data,
            data_before,
            change_context: Some(change_context),
        }
    }

    /// Encodes the envelope as a transport message.
    ///
    /// # Errors
    ///
    /// Fails only if a value in the envelope cannot be serialized.
    pub fn encode(&self) -> Result<RawMessage, DecodeError> {
        let json = serde_json::to_vec(self)?;
        Ok(RawMessage {
            data: Some(STANDARD.encode(json)),
            attributes: BTreeMap::new(),
        })
    }
}

/// A message as delivered by the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Base64 payload.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A message that cannot be turned into an [`EventEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes a transport message into its envelope.
///
/// # Errors
///
/// [`DecodeError::EmptyMessage`] if the message has no content, otherwise
/// the base64 or JSON failure.
pub fn decode(message: &RawMessage) -> Result<EventEnvelope, DecodeError> {
    let encoded = message
        .data
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or(DecodeError::EmptyMessage)?;
    let bytes = STANDARD.decode(encoded)?;
    if bytes.is_empty() {
        return Err(DecodeError::EmptyMessage);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
