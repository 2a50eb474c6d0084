//! Read-only access to the host application's domain tables.
//!
//! Enrichment rules ask for a record by kind, id and column list. Table and
//! column names cannot be bound as query parameters, so they are checked
//! against a strict identifier pattern before being spliced into SQL.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};

use crate::{
    collaborators::DomainLookup,
    error::{CoreError, Result},
    models::{DomainRecord, EntityKind},
};

/// Looks up host records in `<prefix><table>` tables.
pub struct Repository {
    pool: Arc<PgPool>,
    table_prefix: String,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("records::Repository")
            .field("table_prefix", &self.table_prefix)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>, table_prefix: impl Into<String>) -> Self {
        Self { pool, table_prefix: table_prefix.into() }
    }

    /// Prefix applied to host table names.
    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Builds the lookup query for an entity and column list.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the table prefix or any column
    /// name is not a plain SQL identifier.
    pub fn lookup_sql(&self, entity: EntityKind, fields: &[&str]) -> Result<String> {
        let table = format!("{}{}", self.table_prefix, entity.table_name());
        if !is_plain_identifier(&table) {
            return Err(CoreError::InvalidInput(format!("invalid table name: {table}")));
        }

        let columns = if fields.is_empty() {
            "*".to_string()
        } else {
            let mut quoted = Vec::with_capacity(fields.len());
            for field in fields {
                if !is_plain_identifier(field) {
                    return Err(CoreError::InvalidInput(format!("invalid column name: {field}")));
                }
                quoted.push(format!("\"{field}\""));
            }
            quoted.join(", ")
        };

        Ok(format!(
            "SELECT row_to_json(t)::jsonb FROM (SELECT {columns} FROM \"{table}\" WHERE id = $1) AS t"
        ))
    }
}

#[async_trait]
impl DomainLookup for Repository {
    async fn find_record(
        &self,
        entity: EntityKind,
        id: i64,
        fields: &[&str],
    ) -> Result<DomainRecord> {
        let sql = self.lookup_sql(entity, fields)?;

        let record: Option<Json<DomainRecord>> =
            sqlx::query_scalar(&sql).bind(id).fetch_optional(&*self.pool).await?;

        record.map(|Json(record)| record).ok_or_else(|| CoreError::not_found(entity, id))
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}
