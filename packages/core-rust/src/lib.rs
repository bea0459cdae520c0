//! Pipewright Core: schemas, validation, default/modifier pipeline, field
//! visibility and the event envelope codec.
//!
//! Nothing in this crate performs I/O; the server crate wires these pieces
//! into routes, event handlers and storage.

pub mod context;
pub mod defaults;
pub mod event;
pub mod modifiers;
pub mod prepare;
pub mod schema;
pub mod types;
pub mod validation;
pub mod visibility;

pub use context::CallerContext;
pub use defaults::{apply_defaults, DefaultError};
pub use event::{decode, Change, ChangeType, DecodeError, EventContext, EventEnvelope, RawMessage};
pub use modifiers::{apply_modifiers, ModifierError};
pub use prepare::{prepare_mutation, MutationPlan, PrepareError};
pub use schema::{
    DefaultProvider, DefaultValue, FieldRule, FnDefault, FnModifier, Requirement, Schema,
    SchemaDefinitionError, TypeSpec, WriteModifier,
};
pub use types::{Method, Record, ValueKind};
pub use validation::{validate, ValidationError};
pub use visibility::{
    filter_record, filter_response, is_visible, EnvelopeField, Rewrap, UnwrapResponse,
    Visibility, WholeResponse,
};
