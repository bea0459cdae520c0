//! Default filling for records on create.

use futures_util::future::try_join_all;
use serde_json::Value;

use crate::context::CallerContext;
use crate::schema::{DefaultValue, Schema};
use crate::types::Record;

/// A computed default that failed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct DefaultError {
    pub field: String,
    #[source]
    pub source: anyhow::Error,
}

/// Fills in every schema field absent from `record` that declares a default.
///
/// All computations are launched together against the record as it stands
/// before this call and joined; none of them observes another field's
/// default. Results are inserted in schema declaration order once every
/// computation has settled. If any computation fails the record is left
/// untouched and the first error is returned.
///
/// # Errors
///
/// Returns [`DefaultError`] for the first failing computed default.
pub async fn apply_defaults(
    schema: &Schema,
    record: &mut Record,
    ctx: &CallerContext,
) -> Result<(), DefaultError> {
    let resolved = {
        let snapshot: &Record = &*record;
        let pending = schema
            .iter()
            .filter(|(name, _)| !snapshot.contains_key(*name))
            .filter_map(|(name, rule)| rule.default.as_ref().map(|d| (name, d)))
            .map(|(name, default)| async move {
                let value = match default {
                    DefaultValue::Literal(value) => value.clone(),
                    DefaultValue::Computed(provider) => provider
                        .compute(snapshot, ctx)
                        .await
                        .map_err(|source| DefaultError {
                            field: name.to_string(),
                            source,
                        })?,
                };
                Ok::<(String, Value), DefaultError>((name.to_string(), value))
            });
        try_join_all(pending).await?
    };

    for (name, value) in resolved {
        record.insert(name, value);
    }
    Ok(())
}
