//! Repository for the webhook subscriber registry.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{types::Json, PgPool};

use crate::{
    collaborators::SubscriberRegistry,
    error::Result,
    models::{Subscriber, SubscriberId},
};

#[derive(Debug, sqlx::FromRow)]
struct SubscriberRow {
    id: SubscriberId,
    enabled: bool,
    url: String,
    content_type: String,
    auth_header_name: String,
    auth_token: String,
    subscribed_events: Json<HashMap<String, Value>>,
    extra: Json<Value>,
}

impl From<SubscriberRow> for Subscriber {
    fn from(row: SubscriberRow) -> Self {
        Self {
            id: row.id,
            enabled: row.enabled,
            url: row.url,
            content_type: row.content_type,
            auth_header_name: row.auth_header_name,
            auth_token: row.auth_token,
            subscribed_events: row.subscribed_events.0,
            extra: row.extra.0,
        }
    }
}

/// Reads subscribers from `webhook_subscribers`.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("subscribers::Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Lists enabled subscribers ordered by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a row cannot be decoded.
    pub async fn find_enabled(&self) -> Result<Vec<Subscriber>> {
        let rows: Vec<SubscriberRow> = sqlx::query_as(
            r"
            SELECT id, enabled, url, content_type, auth_header_name, auth_token,
                   subscribed_events, extra
            FROM webhook_subscribers
            WHERE enabled
            ORDER BY id
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscriber::from).collect())
    }
}

#[async_trait]
impl SubscriberRegistry for Repository {
    async fn list_active(&self) -> Result<Vec<Subscriber>> {
        self.find_enabled().await
    }
}
