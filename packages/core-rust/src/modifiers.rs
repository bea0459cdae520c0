//! Write modifiers: per-field transforms applied after validation and defaults.

use serde_json::Value;

use crate::context::CallerContext;
use crate::schema::Schema;
use crate::types::{Method, Record};

/// A write modifier that failed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ModifierError {
    pub field: String,
    #[source]
    pub source: anyhow::Error,
}

/// Replaces each field value whose rule declares a write modifier.
///
/// Runs sequentially in the record's key order: a modifier sees the record
/// as changed by the modifiers before it, never by those after it. Reads are
/// left untouched.
///
/// # Errors
///
/// Returns [`ModifierError`] for the first failing modifier; fields modified
/// before the failure keep their new values.
pub async fn apply_modifiers(
    schema: &Schema,
    record: &mut Record,
    method: Method,
    ctx: &CallerContext,
) -> Result<(), ModifierError> {
    if !method.is_mutating() {
        return Ok(());
    }

    let keys: Vec<String> = record.keys().cloned().collect();
    for key in keys {
        let Some(modifier) = schema.get(&key).and_then(|rule| rule.write_modifier.as_ref()) else {
            continue;
        };
        let current = record.get(&key).cloned().unwrap_or(Value::Null);
        let next = modifier
            .modify(current, record, ctx)
            .await
            .map_err(|source| ModifierError {
                field: key.clone(),
                source,
            })?;
        record.insert(key, next);
    }
    Ok(())
}
