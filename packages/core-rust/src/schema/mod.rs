//! Declarative record schemas.
//!
//! A [`Schema`] is an ordered mapping from field name to [`FieldRule`]. Rules
//! are immutable once built and are shared read-only (`Arc<Schema>`) across
//! every request that a service handles.

pub mod meta;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::CallerContext;
use crate::types::{Record, ValueKind};
use crate::visibility::Visibility;

pub use meta::SchemaDefinitionError;

/// Predicate deciding whether a field value is acceptable.
///
/// Receives the value, the full submitted payload, and the caller context.
pub type FieldValidator = Arc<dyn Fn(&Value, &Record, &CallerContext) -> bool + Send + Sync>;

/// Predicate deciding whether a field is required for a given record.
pub type RequiredPredicate = Arc<dyn Fn(&Record, &CallerContext) -> bool + Send + Sync>;

/// Computes a default value for a field missing on create.
///
/// Computations for one record run concurrently and all observe the record
/// as it was before any default was filled in.
#[async_trait]
pub trait DefaultProvider: Send + Sync {
    async fn compute(&self, record: &Record, ctx: &CallerContext) -> anyhow::Result<Value>;
}

/// Transforms a validated field value before it reaches the handler.
#[async_trait]
pub trait WriteModifier: Send + Sync {
    async fn modify(
        &self,
        value: Value,
        record: &Record,
        ctx: &CallerContext,
    ) -> anyhow::Result<Value>;
}

/// Adapts a synchronous closure into a [`DefaultProvider`].
pub struct FnDefault<F>(pub F);

#[async_trait]
impl<F> DefaultProvider for FnDefault<F>
where
    F: Fn(&Record, &CallerContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn compute(&self, record: &Record, ctx: &CallerContext) -> anyhow::Result<Value> {
        (self.0)(record, ctx)
    }
}

/// Adapts a synchronous closure into a [`WriteModifier`].
pub struct FnModifier<F>(pub F);

#[async_trait]
impl<F> WriteModifier for FnModifier<F>
where
    F: Fn(Value, &Record, &CallerContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn modify(
        &self,
        value: Value,
        record: &Record,
        ctx: &CallerContext,
    ) -> anyhow::Result<Value> {
        (self.0)(value, record, ctx)
    }
}

// ---------------------------------------------------------------------------
// Rule attributes
// ---------------------------------------------------------------------------

/// Acceptable runtime kind(s) for a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    One(ValueKind),
    AnyOf(Vec<ValueKind>),
}

impl TypeSpec {
    /// Returns `true` if a value of `kind` satisfies this spec.
    #[must_use]
    pub fn accepts(&self, kind: ValueKind) -> bool {
        match self {
            Self::One(expected) => *expected == kind,
            Self::AnyOf(kinds) => kinds.contains(&kind),
        }
    }

    /// Whether values of this type may carry a nested record.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        self.accepts(ValueKind::Object)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(kind) => write!(f, "of type {kind}"),
            Self::AnyOf(kinds) => {
                let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
                write!(f, "one of {}", names.join(", "))
            }
        }
    }
}

impl From<ValueKind> for TypeSpec {
    fn from(kind: ValueKind) -> Self {
        Self::One(kind)
    }
}

/// Presence rule, evaluated on create only.
#[derive(Clone, Default)]
pub enum Requirement {
    #[default]
    Optional,
    Always,
    When(RequiredPredicate),
}

impl Requirement {
    /// Resolves the rule against the assembled record.
    #[must_use]
    pub fn resolve(&self, record: &Record, ctx: &CallerContext) -> bool {
        match self {
            Self::Optional => false,
            Self::Always => true,
            Self::When(predicate) => predicate(record, ctx),
        }
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optional => f.write_str("Optional"),
            Self::Always => f.write_str("Always"),
            Self::When(_) => f.write_str("When(<predicate>)"),
        }
    }
}

/// Value used for a field absent on create.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Computed(Arc<dyn DefaultProvider>),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(<provider>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldRule
// ---------------------------------------------------------------------------

/// Constraints and transforms for a single field.
///
/// `field_type` is mandatory; every other attribute is independently optional.
#[derive(Clone)]
pub struct FieldRule {
    pub field_type: TypeSpec,
    pub required: Requirement,
    pub enumeration: Option<Vec<Value>>,
    /// Caller-submitted values are dropped before validation.
    pub read_only: bool,
    /// Caller-submitted values are dropped on update.
    pub immutable: bool,
    /// An explicit `null` passes the type check.
    pub nullable: bool,
    pub validator: Option<FieldValidator>,
    pub write_modifier: Option<Arc<dyn WriteModifier>>,
    pub default: Option<DefaultValue>,
    pub visibility: Option<Visibility>,
    pub child_schema: Option<Arc<Schema>>,
}

impl FieldRule {
    /// Creates a rule accepting values of the given type with no other constraint.
    #[must_use]
    pub fn new(field_type: impl Into<TypeSpec>) -> Self {
        Self {
            field_type: field_type.into(),
            required: Requirement::Optional,
            enumeration: None,
            read_only: false,
            immutable: false,
            nullable: false,
            validator: None,
            write_modifier: None,
            default: None,
            visibility: None,
            child_schema: None,
        }
    }

    /// Creates a rule accepting any of the given kinds.
    #[must_use]
    pub fn any_of(kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        Self::new(TypeSpec::AnyOf(kinds.into_iter().collect()))
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = Requirement::Always;
        self
    }

    /// Requires the field only when `predicate` holds for the record.
    #[must_use]
    pub fn required_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record, &CallerContext) -> bool + Send + Sync + 'static,
    {
        self.required = Requirement::When(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enumeration = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &Record, &CallerContext) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn write_modifier(mut self, modifier: impl WriteModifier + 'static) -> Self {
        self.write_modifier = Some(Arc::new(modifier));
        self
    }

    /// Shorthand for a synchronous write modifier.
    #[must_use]
    pub fn modify_with<F>(self, f: F) -> Self
    where
        F: Fn(Value, &Record, &CallerContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.write_modifier(FnModifier(f))
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    #[must_use]
    pub fn default_with(mut self, provider: impl DefaultProvider + 'static) -> Self {
        self.default = Some(DefaultValue::Computed(Arc::new(provider)));
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: impl Into<Visibility>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    #[must_use]
    pub fn child_schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.child_schema = Some(schema.into());
        self
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("enumeration", &self.enumeration)
            .field("read_only", &self.read_only)
            .field("immutable", &self.immutable)
            .field("nullable", &self.nullable)
            .field("validator", &self.validator.is_some())
            .field("write_modifier", &self.write_modifier.is_some())
            .field("default", &self.default)
            .field("visibility", &self.visibility)
            .field("child_schema", &self.child_schema)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered set of field rules describing a record.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldRule)>,
    index: HashMap<String, usize>,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parses and checks a declarative schema document.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaDefinitionError`] found by the meta-validator.
    pub fn from_definition(definition: &Value) -> Result<Self, SchemaDefinitionError> {
        meta::build_schema(definition)
    }

    /// Runs the meta-validator over a schema built in code.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency, e.g. an enum value whose kind the
    /// field's type does not accept.
    pub fn check(&self) -> Result<(), SchemaDefinitionError> {
        meta::check_schema(self, "")
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.index.get(field).map(|&i| &self.fields[i].1)
    }

    /// Iterates fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder for [`Schema`]. Redeclaring a field replaces its rule in place.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        let name = name.into();
        if let Some(&i) = self.schema.index.get(&name) {
            self.schema.fields[i].1 = rule;
        } else {
            self.schema.index.insert(name.clone(), self.schema.fields.len());
            self.schema.fields.push((name, rule));
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Schema {
        self.schema
    }
}
