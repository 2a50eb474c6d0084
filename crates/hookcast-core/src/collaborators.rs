//! Contracts for the collaborators the dispatcher depends on.
//!
//! The dispatch engine owns no state of its own. Subscribers come from a
//! registry, enrichment data from the host's domain tables, and outcomes go to
//! an outcome store. Each of these is injected as a trait object so the
//! engine can run against PostgreSQL in production and in-memory doubles in
//! tests.
//!
//! ```text
//! ┌────────────────────┐  list_active   ┌────────────┐  record   ┌─────────────────┐
//! │ SubscriberRegistry │ ─────────────▶ │ Dispatcher │ ────────▶ │ OutcomeRecorder │
//! └────────────────────┘                └────────────┘           └─────────────────┘
//!                                              │ find_record
//!                                              ▼
//!                                       ┌──────────────┐
//!                                       │ DomainLookup │
//!                                       └──────────────┘
//! ```

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    error::Result,
    models::{DeliveryOutcome, DomainRecord, EntityKind, OutcomeStatus, Subscriber},
};

/// Read side of the subscriber registry.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync + fmt::Debug {
    /// Returns a snapshot of subscribers.
    ///
    /// Implementations may include disabled subscribers but must never omit
    /// an enabled one.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read. The dispatcher treats
    /// this as fatal for the current event.
    async fn list_active(&self) -> Result<Vec<Subscriber>>;
}

/// Read-only access to host domain records used by enrichment.
#[async_trait]
pub trait DomainLookup: Send + Sync + fmt::Debug {
    /// Fetches one record by id, restricted to `fields`.
    ///
    /// An empty `fields` slice returns the full record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no record exists and other variants
    /// when the backend fails.
    async fn find_record(
        &self,
        entity: EntityKind,
        id: i64,
        fields: &[&str],
    ) -> Result<DomainRecord>;
}

/// Sink for delivery outcomes.
///
/// Called once per delivery attempt, possibly from many tasks at once. The
/// dispatcher never inspects whether recording worked, so implementations
/// must deal with their own failures (log them, buffer them, drop them).
#[async_trait]
pub trait OutcomeRecorder: Send + Sync + fmt::Debug {
    /// Stores or reports a single outcome.
    async fn record(&self, outcome: DeliveryOutcome);
}

/// Recorder that emits one structured log line per outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutcomeRecorder;

#[async_trait]
impl OutcomeRecorder for TracingOutcomeRecorder {
    async fn record(&self, outcome: DeliveryOutcome) {
        let duration_ms = outcome.duration.as_millis();
        match outcome.status {
            OutcomeStatus::Delivered => info!(
                subscriber_id = %outcome.subscriber_id,
                delivery_id = %outcome.delivery_id,
                event_name = %outcome.event_name,
                attempt = outcome.attempt_number,
                status = ?outcome.response_status,
                duration_ms,
                "webhook delivery recorded"
            ),
            OutcomeStatus::Rejected | OutcomeStatus::Failed => warn!(
                subscriber_id = %outcome.subscriber_id,
                delivery_id = %outcome.delivery_id,
                event_name = %outcome.event_name,
                attempt = outcome.attempt_number,
                outcome = %outcome.status,
                status = ?outcome.response_status,
                error = outcome.error.as_deref().unwrap_or(""),
                duration_ms,
                "webhook delivery recorded"
            ),
        }
    }
}

/// Recorder that forwards each outcome to several recorders.
///
/// Recorders are invoked concurrently; none of them can prevent the others
/// from seeing the outcome.
#[derive(Debug, Clone, Default)]
pub struct MulticastOutcomeRecorder {
    recorders: Vec<Arc<dyn OutcomeRecorder>>,
}

impl MulticastOutcomeRecorder {
    /// Creates a multicast recorder with no targets.
    pub fn new() -> Self {
        Self { recorders: Vec::new() }
    }

    /// Adds a recorder to receive outcomes.
    pub fn add_recorder(&mut self, recorder: Arc<dyn OutcomeRecorder>) {
        self.recorders.push(recorder);
    }

    /// Number of registered recorders.
    pub fn recorder_count(&self) -> usize {
        self.recorders.len()
    }
}

#[async_trait]
impl OutcomeRecorder for MulticastOutcomeRecorder {
    async fn record(&self, outcome: DeliveryOutcome) {
        let futures = self.recorders.iter().map(|recorder| {
            let outcome = outcome.clone();
            async move { recorder.record(outcome).await }
        });

        futures::future::join_all(futures).await;
    }
}
