//! PostgreSQL-backed collaborators.
//!
//! Each repository owns one concern: the subscriber registry, the outcome
//! log, and read-only access to the host application's domain tables. The
//! repositories implement the collaborator traits directly, so a `Storage`
//! can be split into the three `Arc<dyn ...>` handles the dispatcher takes.

use std::sync::Arc;

use sqlx::PgPool;

pub mod outcomes;
pub mod records;
pub mod subscribers;

use crate::error::Result;

/// Container for all repositories sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Webhook subscriber registry.
    pub subscribers: Arc<subscribers::Repository>,

    /// Delivery outcome log.
    pub outcomes: Arc<outcomes::Repository>,

    /// Host domain records used for enrichment.
    pub records: Arc<records::Repository>,
}

impl Storage {
    /// Creates repositories over `pool`.
    ///
    /// `table_prefix` is prepended to host table names (`quiz`, `course`,
    /// `user`) when looking up domain records.
    pub fn new(pool: PgPool, table_prefix: impl Into<String>) -> Self {
        let pool = Arc::new(pool);

        Self {
            subscribers: Arc::new(subscribers::Repository::new(pool.clone())),
            outcomes: Arc::new(outcomes::Repository::new(pool.clone())),
            records: Arc::new(records::Repository::new(pool, table_prefix)),
        }
    }

    /// Verifies the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.subscribers.pool()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://hookcast@localhost/hookcast").unwrap();
        let storage = Storage::new(pool, "mdl_");
        assert_eq!(storage.records.table_prefix(), "mdl_");
    }
}
