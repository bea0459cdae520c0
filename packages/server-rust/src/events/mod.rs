//! Event entry points: message-bus subscriptions and relayed document changes.
//!
//! 1. **Delivery types** (`delivery`): `EventCall`, `EventOutcome`, `EventError`
//! 2. **Subscriptions** (`subscription`): handlers bound to topics
//! 3. **Staleness** (`staleness`): drop events older than their max age
//! 4. **Idempotency** (`idempotency`): at-most-once guard and `CommitHandle`
//! 5. **Dispatch** (`dispatcher`): decode and run per-function pipelines
//! 6. **Relay** (`relay`): publish document changes to subscribers

pub mod delivery;
pub mod dispatcher;
pub mod idempotency;
pub mod relay;
pub mod staleness;
pub mod subscription;

pub use delivery::{EventCall, EventDelivery, EventError, EventOutcome};
pub use dispatcher::EventDispatcher;
pub use idempotency::{CommitHandle, IdempotencyLayer};
pub use relay::ChangeRelay;
pub use staleness::StalenessLayer;
pub use subscription::{EventHandler, EventSubscription, FnEventHandler};
