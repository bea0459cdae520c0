//! Validation engine for mutation payloads.
//!
//! Fail-fast: the first violation aborts validation and is the only error
//! reported. Unknown and read-only fields are tolerated and dropped, never
//! rejected.

use serde_json::Value;
use tracing::debug;

use crate::context::CallerContext;
use crate::schema::{FieldRule, Schema, TypeSpec};
use crate::types::{Method, Record, ValueKind};

/// A payload that violates its schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid value for {field}, must be {expected}. found {found}")]
    InvalidType {
        field: String,
        expected: TypeSpec,
        found: ValueKind,
    },
    #[error("{value}: is not valid for key: {field}")]
    NotInEnum { field: String, value: String },
    #[error("invalid value for field: {field}")]
    InvalidValue { field: String },
    #[error("{field} is required and missing")]
    MissingRequired { field: String },
}

impl ValidationError {
    /// Dotted path of the offending field.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidType { field, .. }
            | Self::NotInEnum { field, .. }
            | Self::InvalidValue { field }
            | Self::MissingRequired { field } => field,
        }
    }
}

/// Validates `payload` against `schema` and returns the filtered payload.
///
/// Fields are checked in the payload's own order. On `Create`, required
/// fields of the schema are then checked against the filtered payload; on
/// `Update`, immutable fields are dropped.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered.
pub fn validate(
    schema: &Schema,
    payload: Record,
    method: Method,
    ctx: &CallerContext,
) -> Result<Record, ValidationError> {
    let result = validate_at(schema, payload, method, ctx, "");
    if let Err(err) = &result {
        debug!(field = err.field(), error = %err, "payload rejected");
    }
    result
}

fn validate_at(
    schema: &Schema,
    payload: Record,
    method: Method,
    ctx: &CallerContext,
    prefix: &str,
) -> Result<Record, ValidationError> {
    let mut accepted = Record::with_capacity(payload.len());

    for (key, value) in &payload {
        let Some(rule) = schema.get(key) else {
            continue;
        };
        if rule.read_only {
            continue;
        }
        let path = path_of(prefix, key);
        let checked = check_field(rule, value, &payload, method, ctx, &path)?;
        accepted.insert(key.clone(), checked);
    }

    match method {
        Method::Create => {
            for (name, rule) in schema.iter() {
                if !accepted.contains_key(name) && rule.required.resolve(&accepted, ctx) {
                    return Err(ValidationError::MissingRequired {
                        field: path_of(prefix, name),
                    });
                }
            }
        }
        Method::Update => {
            accepted.retain(|key, _| schema.get(key).is_some_and(|rule| !rule.immutable));
        }
        Method::Read | Method::Delete => {}
    }

    Ok(accepted)
}

fn check_field(
    rule: &FieldRule,
    value: &Value,
    payload: &Record,
    method: Method,
    ctx: &CallerContext,
    path: &str,
) -> Result<Value, ValidationError> {
    if value.is_null() && rule.nullable {
        return Ok(Value::Null);
    }

    let kind = ValueKind::of(value);
    if !rule.field_type.accepts(kind) {
        return Err(ValidationError::InvalidType {
            field: path.to_string(),
            expected: rule.field_type.clone(),
            found: kind,
        });
    }

    let checked = match (value, &rule.child_schema) {
        (Value::Object(nested), Some(child)) if rule.field_type.is_structured() => {
            Value::Object(validate_at(child, nested.clone(), method, ctx, path)?)
        }
        _ => value.clone(),
    };

    if let Some(allowed) = &rule.enumeration {
        if !allowed.contains(&checked) {
            return Err(ValidationError::NotInEnum {
                field: path.to_string(),
                value: display_value(&checked),
            });
        }
    }

    if let Some(validator) = &rule.validator {
        if !validator(&checked, payload, ctx) {
            return Err(ValidationError::InvalidValue {
                field: path.to_string(),
            });
        }
    }

    Ok(checked)
}

fn path_of(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn ctx() -> CallerContext {
        CallerContext::new("test")
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn name_schema() -> Schema {
        Schema::builder()
            .field("name", FieldRule::new(ValueKind::String).required())
            .build()
    }

    #[test]
    fn unknown_fields_are_dropped_without_error() {
        let out = validate(
            &name_schema(),
            record(json!({"name": "x", "extra": 1})),
            Method::Create,
            &ctx(),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"name": "x"}));
    }

    #[test]
    fn read_only_fields_are_stripped_before_checks() {
        let schema = Schema::builder()
            .field("id", FieldRule::new(ValueKind::String).read_only())
            .build();
        // Wrong type would fail if the field were checked.
        let out = validate(&schema, record(json!({"id": 42})), Method::Create, &ctx()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn immutable_fields_are_stripped_on_update_only() {
        let schema = Schema::builder()
            .field("owner", FieldRule::new(ValueKind::String).immutable())
            .field("title", FieldRule::new(ValueKind::String))
            .build();
        let payload = record(json!({"owner": "a", "title": "t"}));

        let updated = validate(&schema, payload.clone(), Method::Update, &ctx()).unwrap();
        assert_eq!(Value::Object(updated), json!({"title": "t"}));

        let created = validate(&schema, payload, Method::Create, &ctx()).unwrap();
        assert_eq!(Value::Object(created), json!({"owner": "a", "title": "t"}));
    }

    #[test]
    fn required_applies_on_create_only() {
        let err = validate(&name_schema(), Record::new(), Method::Create, &ctx()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingRequired {
                field: "name".into()
            }
        );
        assert_eq!(err.to_string(), "name is required and missing");

        assert!(validate(&name_schema(), Record::new(), Method::Update, &ctx()).is_ok());
    }

    #[test]
    fn submitted_read_only_field_does_not_satisfy_required() {
        let schema = Schema::builder()
            .field("name", FieldRule::new(ValueKind::String).required().read_only())
            .build();
        let err = validate(&schema, record(json!({"name": "x"})), Method::Create, &ctx())
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequired { .. }));
    }

    #[test]
    fn required_predicate_resolves_against_filtered_payload() {
        let schema = Schema::builder()
            .field("kind", FieldRule::new(ValueKind::String))
            .field(
                "reason",
                FieldRule::new(ValueKind::String)
                    .required_when(|rec, _| rec.get("kind") == Some(&json!("refund"))),
            )
            .build();
        assert!(validate(&schema, record(json!({"kind": "sale"})), Method::Create, &ctx()).is_ok());
        let err = validate(&schema, record(json!({"kind": "refund"})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(err.field(), "reason");
    }

    #[test]
    fn enum_membership_is_enforced() {
        let schema = Schema::builder()
            .field("status", FieldRule::new(ValueKind::String).one_of(["a", "b"]))
            .build();
        let err = validate(&schema, record(json!({"status": "c"})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(err.to_string(), "c: is not valid for key: status");
        assert!(validate(&schema, record(json!({"status": "a"})), Method::Create, &ctx()).is_ok());
    }

    #[test]
    fn type_mismatch_reports_expected_and_found() {
        let schema = Schema::builder()
            .field(
                "score",
                FieldRule::any_of([ValueKind::String, ValueKind::Number]),
            )
            .build();
        let err = validate(&schema, record(json!({"score": true})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for score, must be one of string, number. found boolean"
        );
        assert!(validate(&schema, record(json!({"score": "7"})), Method::Create, &ctx()).is_ok());
    }

    #[test]
    fn nullable_accepts_explicit_null_regardless_of_type() {
        let schema = Schema::builder()
            .field("nick", FieldRule::new(ValueKind::String).nullable().one_of(["a"]))
            .field("age", FieldRule::new(ValueKind::Number))
            .build();
        let out = validate(&schema, record(json!({"nick": null})), Method::Create, &ctx()).unwrap();
        assert_eq!(out.get("nick"), Some(&Value::Null));

        let err = validate(&schema, record(json!({"age": null})), Method::Create, &ctx())
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { found: ValueKind::Null, .. }));
    }

    #[test]
    fn validator_failure_is_generic() {
        let schema = Schema::builder()
            .field(
                "email",
                FieldRule::new(ValueKind::String)
                    .validator(|v, _, _| v.as_str().is_some_and(|s| s.contains('@'))),
            )
            .build();
        let err = validate(&schema, record(json!({"email": "nope"})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for field: email");
    }

    #[test]
    fn validator_sees_full_payload_and_context() {
        let schema = Schema::builder()
            .field(
                "limit",
                FieldRule::new(ValueKind::Number).validator(|v, rec, ctx| {
                    ctx.role.as_deref() == Some("admin")
                        || (rec.contains_key("plan") && v.as_u64().is_some_and(|n| n < 10))
                }),
            )
            .build();
        let payload = record(json!({"limit": 50, "plan": "basic"}));
        assert!(validate(&schema, payload.clone(), Method::Create, &ctx()).is_err());
        let admin = ctx().with_role("admin");
        assert!(validate(&schema, payload, Method::Create, &admin).is_ok());
    }

    #[test]
    fn child_schema_is_validated_recursively() {
        let address = Schema::builder()
            .field("city", FieldRule::new(ValueKind::String).required())
            .field("zip", FieldRule::new(ValueKind::String).immutable())
            .build();
        let schema = Schema::builder()
            .field("address", FieldRule::new(ValueKind::Object).child_schema(address))
            .build();

        let out = validate(
            &schema,
            record(json!({"address": {"city": "Oslo", "planet": "earth"}})),
            Method::Create,
            &ctx(),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"address": {"city": "Oslo"}}));

        let err = validate(
            &schema,
            record(json!({"address": {"city": 1}})),
            Method::Create,
            &ctx(),
        )
        .unwrap_err();
        assert_eq!(err.field(), "address.city");

        let err = validate(&schema, record(json!({"address": {}})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingRequired {
                field: "address.city".into()
            }
        );

        // Same method propagates into the nested payload.
        let out = validate(
            &schema,
            record(json!({"address": {"zip": "0150"}})),
            Method::Update,
            &ctx(),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"address": {}}));
    }

    #[test]
    fn first_violation_in_payload_order_wins() {
        let schema = Schema::builder()
            .field("a", FieldRule::new(ValueKind::Number))
            .field("b", FieldRule::new(ValueKind::Number))
            .build();
        let err = validate(&schema, record(json!({"b": "x", "a": "y"})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(err.field(), "b");
        let err = validate(&schema, record(json!({"a": "y", "b": "x"})), Method::Create, &ctx())
            .unwrap_err();
        assert_eq!(err.field(), "a");
    }

    #[test]
    fn filtered_payload_keeps_submission_order() {
        let schema = Schema::builder()
            .field("a", FieldRule::new(ValueKind::Number))
            .field("b", FieldRule::new(ValueKind::Number))
            .build();
        let out = validate(&schema, record(json!({"b": 1, "x": 0, "a": 2})), Method::Update, &ctx())
            .unwrap();
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    proptest! {
        #[test]
        fn fields_outside_schema_never_fail(
            extra in proptest::collection::btree_map("[a-z]{3,8}", any::<i64>(), 0..6)
        ) {
            let mut payload = Record::new();
            payload.insert("name".into(), json!("x"));
            for (key, value) in &extra {
                if key != "name" {
                    payload.insert(key.clone(), json!(value));
                }
            }
            let out = validate(&name_schema(), payload, Method::Create, &ctx());
            prop_assert!(out.is_ok());
            let out = out.unwrap();
            prop_assert_eq!(out.len(), 1);
        }
    }
}
