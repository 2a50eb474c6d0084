//! Repository for the delivery outcome log.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;

use crate::{collaborators::OutcomeRecorder, error::Result, models::DeliveryOutcome};

/// Appends outcomes to `webhook_delivery_outcomes`.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("outcomes::Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts one outcome row.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let duration_ms = i64::try_from(outcome.duration.as_millis()).unwrap_or(i64::MAX);
        let attempt_number = i32::try_from(outcome.attempt_number).unwrap_or(i32::MAX);

        sqlx::query(
            r"
            INSERT INTO webhook_delivery_outcomes (
                delivery_id, subscriber_id, event_name, attempt_number, status,
                response_status, response_body, error, duration_ms, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(outcome.delivery_id)
        .bind(outcome.subscriber_id)
        .bind(&outcome.event_name)
        .bind(attempt_number)
        .bind(outcome.status.as_str())
        .bind(outcome.response_status.map(i32::from))
        .bind(outcome.response_body.as_deref())
        .bind(outcome.error.as_deref())
        .bind(duration_ms)
        .bind(outcome.recorded_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutcomeRecorder for Repository {
    async fn record(&self, outcome: DeliveryOutcome) {
        if let Err(e) = self.insert(&outcome).await {
            error!(
                subscriber_id = %outcome.subscriber_id,
                delivery_id = %outcome.delivery_id,
                error = %e,
                "failed to store delivery outcome"
            );
        }
    }
}
