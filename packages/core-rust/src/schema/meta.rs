//! Schema meta-validation.
//!
//! Checks declarative schema documents against a fixed rule table before
//! they are turned into a [`Schema`], and checks code-built schemas for
//! internally inconsistent rules. Services run this at registration time
//! and log the outcome.

use serde_json::Value;

use super::{FieldRule, Requirement, Schema, TypeSpec};
use crate::types::ValueKind;
use crate::visibility::Visibility;

/// How an attribute value in a schema document must look.
#[derive(Debug, Clone, Copy)]
enum AttributeShape {
    Bool,
    TypeName,
    List,
    AnyValue,
    ModeOrModes,
    Definition,
    CodeOnly,
}

/// Attribute table: (key, shape, mandatory).
const ATTRIBUTES: &[(&str, AttributeShape, bool)] = &[
    ("type", AttributeShape::TypeName, true),
    ("required", AttributeShape::Bool, false),
    ("enum", AttributeShape::List, false),
    ("readOnly", AttributeShape::Bool, false),
    ("immutable", AttributeShape::Bool, false),
    ("nullable", AttributeShape::Bool, false),
    ("default", AttributeShape::AnyValue, false),
    ("visibility", AttributeShape::ModeOrModes, false),
    ("childSchema", AttributeShape::Definition, false),
    ("validator", AttributeShape::CodeOnly, false),
    ("writeModifier", AttributeShape::CodeOnly, false),
];

/// A schema document or schema rule that fails meta-validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaDefinitionError {
    #[error("schema definition must be an object mapping field names to rules")]
    NotAnObject,
    #[error("config for key: {field} is of an invalid type. Expected an 'object'")]
    RuleNotAnObject { field: String },
    #[error("invalid param '{attribute}' for field '{field}'")]
    UnknownAttribute { field: String, attribute: String },
    #[error("invalid value at '{attribute}' for field '{field}'")]
    InvalidAttribute { field: String, attribute: String },
    #[error("key 'type' is required at '{field}' but is missing")]
    MissingType { field: String },
    #[error("'{attribute}' for field '{field}' can only be attached in code")]
    CodeOnlyAttribute { field: String, attribute: String },
    #[error("invalid enum value {value} for field '{field}'. enum values must be of field type {expected}")]
    EnumTypeMismatch {
        field: String,
        value: String,
        expected: String,
    },
    #[error("field '{field}' declares a child schema but its type cannot hold a record")]
    ChildSchemaOnScalar { field: String },
}

fn path_of(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

// ---------------------------------------------------------------------------
// Declarative documents
// ---------------------------------------------------------------------------

/// Checks a schema document without building it.
///
/// # Errors
///
/// Returns the first violation found, in document order.
pub fn check_definition(definition: &Value) -> Result<(), SchemaDefinitionError> {
    build_at(definition, "").map(|_| ())
}

pub(super) fn build_schema(definition: &Value) -> Result<Schema, SchemaDefinitionError> {
    build_at(definition, "")
}

fn build_at(definition: &Value, prefix: &str) -> Result<Schema, SchemaDefinitionError> {
    let Value::Object(fields) = definition else {
        return Err(SchemaDefinitionError::NotAnObject);
    };

    let mut builder = Schema::builder();
    for (name, config) in fields {
        let path = path_of(prefix, name);
        let Value::Object(config) = config else {
            return Err(SchemaDefinitionError::RuleNotAnObject { field: path });
        };

        for (attribute, value) in config {
            let Some((_, shape, _)) = ATTRIBUTES.iter().find(|(key, _, _)| *key == attribute.as_str())
            else {
                return Err(SchemaDefinitionError::UnknownAttribute {
                    field: path,
                    attribute: attribute.clone(),
                });
            };
            check_shape(*shape, value, &path, attribute)?;
        }

        for (attribute, _, mandatory) in ATTRIBUTES {
            if *mandatory && !config.contains_key(*attribute) {
                return Err(SchemaDefinitionError::MissingType { field: path });
            }
        }

        let rule = build_rule(config, &path)?;
        check_rule(&rule, &path)?;
        builder = builder.field(name.clone(), rule);
    }
    Ok(builder.build())
}

fn check_shape(
    shape: AttributeShape,
    value: &Value,
    field: &str,
    attribute: &str,
) -> Result<(), SchemaDefinitionError> {
    let valid = match shape {
        AttributeShape::Bool => value.is_boolean(),
        AttributeShape::TypeName => match value {
            Value::String(name) => ValueKind::parse(name).is_some(),
            Value::Array(names) => {
                !names.is_empty()
                    && names
                        .iter()
                        .all(|n| n.as_str().and_then(ValueKind::parse).is_some())
            }
            _ => false,
        },
        AttributeShape::List => value.is_array(),
        AttributeShape::AnyValue => true,
        AttributeShape::ModeOrModes => match value {
            Value::String(_) => true,
            Value::Array(modes) => modes.iter().all(Value::is_string),
            _ => false,
        },
        AttributeShape::Definition => value.is_object(),
        AttributeShape::CodeOnly => {
            return Err(SchemaDefinitionError::CodeOnlyAttribute {
                field: field.to_string(),
                attribute: attribute.to_string(),
            });
        }
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaDefinitionError::InvalidAttribute {
            field: field.to_string(),
            attribute: attribute.to_string(),
        })
    }
}

/// Builds a rule from an attribute map whose shapes were already checked.
fn build_rule(
    config: &serde_json::Map<String, Value>,
    path: &str,
) -> Result<FieldRule, SchemaDefinitionError> {
    let Some(type_value) = config.get("type") else {
        return Err(SchemaDefinitionError::MissingType {
            field: path.to_string(),
        });
    };
    let field_type = match type_value {
        Value::Array(names) => TypeSpec::AnyOf(
            names
                .iter()
                .filter_map(|n| n.as_str().and_then(ValueKind::parse))
                .collect(),
        ),
        other => TypeSpec::One(
            other
                .as_str()
                .and_then(ValueKind::parse)
                .ok_or_else(|| SchemaDefinitionError::InvalidAttribute {
                    field: path.to_string(),
                    attribute: "type".to_string(),
                })?,
        ),
    };

    let flag = |key: &str| config.get(key).and_then(Value::as_bool).unwrap_or(false);

    let mut rule = FieldRule::new(field_type);
    if flag("required") {
        rule.required = Requirement::Always;
    }
    rule.read_only = flag("readOnly");
    rule.immutable = flag("immutable");
    rule.nullable = flag("nullable");
    rule.enumeration = config.get("enum").and_then(Value::as_array).cloned();
    if let Some(default) = config.get("default") {
        rule = rule.default_value(default.clone());
    }
    if let Some(visibility) = config.get("visibility") {
        let visibility: Visibility = serde_json::from_value(visibility.clone()).map_err(|_| {
            SchemaDefinitionError::InvalidAttribute {
                field: path.to_string(),
                attribute: "visibility".to_string(),
            }
        })?;
        rule.visibility = Some(visibility);
    }
    if let Some(child) = config.get("childSchema") {
        rule = rule.child_schema(build_at(child, path)?);
    }
    Ok(rule)
}

// ---------------------------------------------------------------------------
// Rule consistency (shared by documents and code-built schemas)
// ---------------------------------------------------------------------------

pub(super) fn check_schema(schema: &Schema, prefix: &str) -> Result<(), SchemaDefinitionError> {
    for (name, rule) in schema.iter() {
        let path = path_of(prefix, name);
        check_rule(rule, &path)?;
        if let Some(child) = &rule.child_schema {
            check_schema(child, &path)?;
        }
    }
    Ok(())
}

fn check_rule(rule: &FieldRule, path: &str) -> Result<(), SchemaDefinitionError> {
    if let Some(values) = &rule.enumeration {
        if let Some(bad) = values
            .iter()
            .find(|v| !rule.field_type.accepts(ValueKind::of(v)))
        {
            return Err(SchemaDefinitionError::EnumTypeMismatch {
                field: path.to_string(),
                value: bad.to_string(),
                expected: rule.field_type.to_string(),
            });
        }
    }
    if rule.child_schema.is_some() && !rule.field_type.is_structured() {
        return Err(SchemaDefinitionError::ChildSchemaOnScalar {
            field: path.to_string(),
        });
    }
    Ok(())
}
