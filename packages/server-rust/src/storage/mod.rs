//! Document storage for the `Pipewright` server.
//!
//! - [`DocumentStore`]: pluggable persistence with optimistic transactions
//! - [`engines`]: in-memory and redb backends
//! - [`idempotency`]: completion records written by the event guard
//! - [`janitor`]: retention sweep over completion records

pub mod document;
pub mod engines;
pub mod idempotency;
pub mod janitor;

pub use document::*;
pub use engines::*;
pub use idempotency::*;
pub use janitor::IdempotencyJanitor;
