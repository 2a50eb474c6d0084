//! Error types shared by collaborator implementations.
//!
//! Every collaborator the dispatcher talks to (subscriber registry, domain
//! lookup, outcome store) reports failures through `CoreError`, so the
//! delivery crate can classify them without knowing which backend produced
//! them.

use thiserror::Error;

use crate::models::EntityKind;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for collaborator operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Backing store could not be reached or rejected the query.
    #[error("database error: {0}")]
    Database(String),

    /// A referenced domain record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record that was requested
        entity: EntityKind,
        /// Identifier that was requested
        id: i64,
    },

    /// A requested row does not exist outside of domain lookups.
    #[error("not found: {0}")]
    Missing(String),

    /// Caller supplied something the backend refuses to handle.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored data could not be decoded into the domain model.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure injected by an in-memory collaborator.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CoreError {
    /// Creates a not-found error for a domain record.
    pub fn not_found(entity: EntityKind, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Returns true when the error means the referenced data is absent rather
    /// than the backend being broken.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Missing(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::Missing("requested row not found".to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_entity_and_id() {
        let error = CoreError::not_found(EntityKind::Quiz, 7);
        assert_eq!(error.to_string(), "quiz 7 not found");
        assert!(error.is_not_found());
    }

    #[test]
    fn row_not_found_maps_to_missing() {
        let error = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, CoreError::Missing(_)));
        assert!(error.is_not_found());
    }

    #[test]
    fn pool_timeout_is_a_database_error() {
        let error = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(error, CoreError::Database(_)));
        assert!(!error.is_not_found());
    }
}
