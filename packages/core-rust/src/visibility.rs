//! Field-level response visibility.
//!
//! Each schema field may be scoped to one or more audience modes. Responses
//! are filtered per caller mode through an [`UnwrapResponse`] adapter, which
//! lets handlers return arbitrarily shaped envelopes (`{status, data}`, bare
//! records, lists) while the filter only ever sees records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;
use crate::types::Record;

/// Mode or set of modes in which a field (or route) is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Visibility {
    Mode(String),
    Modes(Vec<String>),
}

impl Visibility {
    /// Returns `true` if `mode` is one of the declared modes.
    #[must_use]
    pub fn permits(&self, mode: &str) -> bool {
        match self {
            Self::Mode(declared) => declared == mode,
            Self::Modes(declared) => declared.iter().any(|m| m == mode),
        }
    }
}

impl From<&str> for Visibility {
    fn from(mode: &str) -> Self {
        Self::Mode(mode.to_string())
    }
}

impl From<String> for Visibility {
    fn from(mode: String) -> Self {
        Self::Mode(mode)
    }
}

impl<const N: usize> From<[&str; N]> for Visibility {
    fn from(modes: [&str; N]) -> Self {
        Self::Modes(modes.iter().map(|m| (*m).to_string()).collect())
    }
}

impl From<Vec<String>> for Visibility {
    fn from(modes: Vec<String>) -> Self {
        Self::Modes(modes)
    }
}

/// Unset visibility means visible in every mode.
#[must_use]
pub fn is_visible(declared: Option<&Visibility>, mode: &str) -> bool {
    declared.map_or(true, |v| v.permits(mode))
}

/// Keeps only the fields of `record` visible in `mode`.
///
/// Fields absent from the schema have no declared visibility and are kept.
#[must_use]
pub fn filter_record(schema: &Schema, mode: &str, record: Record) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| {
            let declared = schema.get(key).and_then(|rule| rule.visibility.as_ref());
            is_visible(declared, mode)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Unwrap / rewrap adapters
// ---------------------------------------------------------------------------

/// Rebuilds the original envelope around the filtered unit.
pub type Rewrap = Box<dyn FnOnce(Value) -> Value + Send>;

/// Extracts the filterable unit from a response envelope.
///
/// Returns the unit (a record or a list of records) together with the
/// function that puts the filtered unit back into the envelope.
pub trait UnwrapResponse: Send + Sync {
    fn unwrap(&self, response: Value) -> (Value, Rewrap);
}

impl<F> UnwrapResponse for F
where
    F: Fn(Value) -> (Value, Rewrap) + Send + Sync,
{
    fn unwrap(&self, response: Value) -> (Value, Rewrap) {
        self(response)
    }
}

/// Treats the whole response as the filterable unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeResponse;

impl UnwrapResponse for WholeResponse {
    fn unwrap(&self, response: Value) -> (Value, Rewrap) {
        (response, Box::new(|filtered| filtered))
    }
}

/// Filters the value stored under one key of an object envelope,
/// e.g. `data` in `{status, data}`. Other envelope keys keep their position.
#[derive(Debug, Clone)]
pub struct EnvelopeField {
    field: String,
}

impl EnvelopeField {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl UnwrapResponse for EnvelopeField {
    fn unwrap(&self, mut response: Value) -> (Value, Rewrap) {
        let Some(unit) = response.get_mut(&self.field).map(Value::take) else {
            return (Value::Null, Box::new(move |_| response));
        };
        let field = self.field.clone();
        let rewrap: Rewrap = Box::new(move |filtered| {
            if let Some(slot) = response.get_mut(&field) {
                *slot = filtered;
            }
            response
        });
        (unit, rewrap)
    }
}

/// Applies field visibility for `mode` to a handler response.
///
/// Lists are filtered element-wise; anything that is not a record passes
/// through untouched.
#[must_use]
pub fn filter_response(
    mode: &str,
    schema: &Schema,
    adapter: &dyn UnwrapResponse,
    response: Value,
) -> Value {
    let (unit, rewrap) = adapter.unwrap(response);
    let filtered = match unit {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| filter_value(mode, schema, item))
                .collect(),
        ),
        other => filter_value(mode, schema, other),
    };
    rewrap(filtered)
}

fn filter_value(mode: &str, schema: &Schema, value: Value) -> Value {
    match value {
        Value::Object(record) => Value::Object(filter_record(schema, mode, record)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::schema::FieldRule;
    use crate::types::ValueKind;

    fn contact_schema() -> Schema {
        Schema::builder()
            .field("name", FieldRule::new(ValueKind::String))
            .field(
                "email",
                FieldRule::new(ValueKind::String).visibility("internal"),
            )
            .build()
    }

    #[test]
    fn unset_visibility_is_visible_everywhere() {
        assert!(is_visible(None, "external"));
        assert!(is_visible(Some(&"internal".into()), "internal"));
        assert!(!is_visible(Some(&"internal".into()), "external"));
        assert!(is_visible(Some(&["internal", "external"].into()), "external"));
    }

    #[test]
    fn external_mode_strips_internal_fields() {
        let result = filter_response(
            "external",
            &contact_schema(),
            &WholeResponse,
            json!({"name": "x", "email": "y"}),
        );
        assert_eq!(result, json!({"name": "x"}));
    }

    #[test]
    fn internal_mode_keeps_everything() {
        let original = json!({"name": "x", "email": "y"});
        let result = filter_response("internal", &contact_schema(), &WholeResponse, original.clone());
        assert_eq!(result, original);
    }

    #[test]
    fn field_visible_in_both_modes() {
        let schema = Schema::builder()
            .field(
                "email",
                FieldRule::new(ValueKind::String).visibility(["internal", "external"]),
            )
            .build();
        for mode in ["internal", "external"] {
            let result = filter_response(mode, &schema, &WholeResponse, json!({"email": "y"}));
            assert_eq!(result, json!({"email": "y"}));
        }
    }

    #[test]
    fn closure_adapter_rewraps_data_envelope() {
        let adapter = |mut response: Value| -> (Value, Rewrap) {
            let data = response["data"].take();
            (
                data,
                Box::new(move |modified| {
                    response["data"] = modified;
                    response
                }),
            )
        };
        let envelope = json!({"status": "success", "data": [{"name": "x", "email": "y"}]});
        let result = filter_response("external", &contact_schema(), &adapter, envelope);
        assert_eq!(result, json!({"status": "success", "data": [{"name": "x"}]}));
    }

    #[test]
    fn envelope_field_keeps_key_order() {
        let envelope = json!({"status": "success", "data": {"name": "x", "email": "y"}, "page": 1});
        let result = filter_response(
            "external",
            &contact_schema(),
            &EnvelopeField::new("data"),
            envelope,
        );
        let keys: Vec<_> = result.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["status", "data", "page"]);
        assert_eq!(result["data"], json!({"name": "x"}));
    }

    #[test]
    fn envelope_without_field_is_returned_unchanged() {
        let envelope = json!({"status": "error"});
        let result = filter_response(
            "external",
            &contact_schema(),
            &EnvelopeField::new("data"),
            envelope.clone(),
        );
        assert_eq!(result, envelope);
    }

    #[test]
    fn non_record_units_pass_through() {
        let result = filter_response("external", &contact_schema(), &WholeResponse, json!("plain"));
        assert_eq!(result, json!("plain"));
    }

    proptest! {
        #[test]
        fn filtering_never_adds_fields(keys in proptest::collection::vec("[a-z]{1,6}", 0..8)) {
            let record: Record = keys.iter().map(|k| (k.clone(), json!(1))).collect();
            let filtered = filter_record(&contact_schema(), "external", record.clone());
            prop_assert!(filtered.len() <= record.len());
            prop_assert!(filtered.keys().all(|k| record.contains_key(k)));
        }
    }
}
