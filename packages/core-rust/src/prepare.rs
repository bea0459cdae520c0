//! The mutation path: validate, fill defaults, apply modifiers.
//!
//! [`prepare_mutation`] is the only way the server runs these stages, so a
//! payload that fails validation never reaches a default computation and a
//! modifier never sees unvalidated input.

use crate::context::CallerContext;
use crate::defaults::{apply_defaults, DefaultError};
use crate::modifiers::{apply_modifiers, ModifierError};
use crate::schema::Schema;
use crate::types::{Method, Record};
use crate::validation::{validate, ValidationError};

/// Schemas used by each stage of one mutation.
///
/// A route may validate against a create-specific schema while defaults and
/// modifiers come from the same schema; `modifiers` is `None` when the
/// service has not opted into write modifiers.
#[derive(Debug, Clone, Copy)]
pub struct MutationPlan<'a> {
    pub validation: &'a Schema,
    pub defaults: &'a Schema,
    pub modifiers: Option<&'a Schema>,
}

impl<'a> MutationPlan<'a> {
    /// All stages use `schema`.
    #[must_use]
    pub fn single(schema: &'a Schema, with_modifiers: bool) -> Self {
        Self {
            validation: schema,
            defaults: schema,
            modifiers: with_modifiers.then_some(schema),
        }
    }
}

/// Failure of one of the mutation stages.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Default(#[from] DefaultError),
    #[error(transparent)]
    Modifier(#[from] ModifierError),
}

/// Runs validation, defaults (create only) and modifiers in that order.
///
/// # Errors
///
/// Returns the first stage failure; later stages do not run.
pub async fn prepare_mutation(
    plan: MutationPlan<'_>,
    payload: Record,
    method: Method,
    ctx: &CallerContext,
) -> Result<Record, PrepareError> {
    let mut record = validate(plan.validation, payload, method, ctx)?;

    if method == Method::Create {
        apply_defaults(plan.defaults, &mut record, ctx).await?;
    }
    if let Some(schema) = plan.modifiers {
        apply_modifiers(schema, &mut record, method, ctx).await?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::schema::{FieldRule, FnDefault};
    use crate::types::ValueKind;

    fn payload(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn article_schema(default_ran: Arc<AtomicBool>) -> Schema {
        Schema::builder()
            .field("title", FieldRule::new(ValueKind::String).required())
            .field(
                "status",
                FieldRule::new(ValueKind::String).default_with(FnDefault(
                    move |_: &Record, _: &CallerContext| {
                        default_ran.store(true, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(json!("draft"))
                    },
                )),
            )
            .field(
                "slug",
                FieldRule::new(ValueKind::String)
                    .modify_with(|v, _, _| Ok(json!(v.as_str().unwrap_or_default().to_lowercase()))),
            )
            .build()
    }

    #[tokio::test]
    async fn create_runs_every_stage_in_order() {
        let schema = article_schema(Arc::new(AtomicBool::new(false)));
        let record = prepare_mutation(
            MutationPlan::single(&schema, true),
            payload(json!({"title": "Hello", "slug": "HELLO", "junk": 1})),
            Method::Create,
            &CallerContext::new("t"),
        )
        .await
        .unwrap();
        assert_eq!(
            Value::Object(record),
            json!({"title": "Hello", "slug": "hello", "status": "draft"})
        );
    }

    #[tokio::test]
    async fn defaults_never_run_for_invalid_payloads() {
        let ran = Arc::new(AtomicBool::new(false));
        let schema = article_schema(Arc::clone(&ran));
        let err = prepare_mutation(
            MutationPlan::single(&schema, true),
            payload(json!({"title": 7})),
            Method::Create,
            &CallerContext::new("t"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PrepareError::Validation(_)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn modifiers_are_opt_in() {
        let schema = article_schema(Arc::new(AtomicBool::new(false)));
        let record = prepare_mutation(
            MutationPlan::single(&schema, false),
            payload(json!({"slug": "KEEP"})),
            Method::Update,
            &CallerContext::new("t"),
        )
        .await
        .unwrap();
        assert_eq!(record.get("slug"), Some(&json!("KEEP")));
    }

    #[tokio::test]
    async fn update_skips_defaults() {
        let ran = Arc::new(AtomicBool::new(false));
        let schema = article_schema(Arc::clone(&ran));
        let record = prepare_mutation(
            MutationPlan::single(&schema, true),
            Record::new(),
            Method::Update,
            &CallerContext::new("t"),
        )
        .await
        .unwrap();
        assert!(record.is_empty());
        assert!(!ran.load(Ordering::SeqCst));
    }
}
