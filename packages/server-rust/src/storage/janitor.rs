//! Retention sweep for idempotency records.
//!
//! Completion records only need to outlive the redelivery window of the
//! message bus. The janitor deletes records whose timestamp is older than
//! the configured retention on every tick of its `BackgroundWorker`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::document::{SharedStore, StoreError};
use super::idempotency::{IdempotencyRecord, IDEMPOTENCY_COLLECTION};
use crate::service::worker::BackgroundRunnable;

/// On-demand janitor tasks.
#[derive(Debug)]
pub enum JanitorTask {
    /// Sweep immediately instead of waiting for the next tick.
    SweepNow,
}

/// Deletes idempotency records past their retention horizon.
pub struct IdempotencyJanitor {
    store: SharedStore,
    retention: Duration,
}

impl IdempotencyJanitor {
    #[must_use]
    pub fn new(store: SharedStore, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Deletes every record older than the retention horizon and returns how
    /// many were removed. Records that cannot be decoded are left alone.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let horizon = Utc::now().timestamp_millis().saturating_sub(retention_ms);

        let mut removed = 0;
        for (id, document) in self.store.scan(IDEMPOTENCY_COLLECTION).await? {
            match IdempotencyRecord::from_document(document) {
                Ok(record) if record.timestamp < horizon => {
                    self.store.delete(IDEMPOTENCY_COLLECTION, &id).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => debug!(id = %id, error = %e, "skipping undecodable idempotency record"),
            }
        }
        Ok(removed)
    }

    async fn sweep_and_log(&self) {
        match self.sweep().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "expired idempotency records deleted"),
            Err(e) => warn!(error = %e, "idempotency sweep failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for IdempotencyJanitor {
    type Task = JanitorTask;

    async fn run(&mut self, task: JanitorTask) {
        match task {
            JanitorTask::SweepNow => self.sweep_and_log().await,
        }
    }

    async fn on_tick(&mut self) {
        self.sweep_and_log().await;
    }
}
