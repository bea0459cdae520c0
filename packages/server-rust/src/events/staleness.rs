//! Drops events older than a configured age.

use std::task::{Context, Poll};

use chrono::Utc;
use tower::{Layer, Service};
use tracing::info;

use super::delivery::{EventCall, EventError, EventFuture, EventOutcome};

// ---------------------------------------------------------------------------
// StalenessLayer
// ---------------------------------------------------------------------------

/// Drops events whose delivery timestamp is more than `max_age_ms` old.
///
/// Events without a timestamp are always passed on. A dropped event is a
/// success ([`EventOutcome::StaleDropped`]) so the transport stops retrying.
#[derive(Debug, Clone, Copy)]
pub struct StalenessLayer {
    max_age_ms: u64,
}

impl StalenessLayer {
    #[must_use]
    pub fn new(max_age_ms: u64) -> Self {
        Self { max_age_ms }
    }
}

impl<S> Layer<S> for StalenessLayer {
    type Service = StalenessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StalenessService {
            inner,
            max_age_ms: self.max_age_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// StalenessService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StalenessService<S> {
    inner: S,
    max_age_ms: u64,
}

impl<S> Service<EventCall> for StalenessService<S>
where
    S: Service<EventCall, Response = EventOutcome, Error = EventError>,
    S::Future: Send + 'static,
{
    type Response = EventOutcome;
    type Error = EventError;
    type Future = EventFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: EventCall) -> Self::Future {
        let context = &call.delivery.context;
        if let Some(age_ms) = context.age_ms(Utc::now()) {
            let max_age = i64::try_from(self.max_age_ms).unwrap_or(i64::MAX);
            if age_ms > max_age {
                info!(
                    function = %call.delivery.function_name,
                    max_age_ms = self.max_age_ms,
                    "Dropping event {} with age[ms]: {age_ms}",
                    context.event_id
                );
                return Box::pin(async { Ok(EventOutcome::StaleDropped) });
            }
        }
        Box::pin(self.inner.call(call))
    }
}
