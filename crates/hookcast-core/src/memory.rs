//! In-memory collaborator implementations.
//!
//! Used by tests and by hosts that embed the dispatcher with their own
//! subscriber list. All types are cheap to clone and share state across
//! clones, so a test can keep a handle while the dispatcher owns another.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    collaborators::{DomainLookup, OutcomeRecorder, SubscriberRegistry},
    error::{CoreError, Result},
    models::{
        id_from_value, DeliveryOutcome, DomainRecord, EntityKind, Subscriber, SubscriberId,
    },
};

/// Subscriber registry backed by a vector, with failure injection.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriberRegistry {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl InMemorySubscriberRegistry {
    /// Creates a registry holding the given subscribers.
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self { subscribers: Arc::new(RwLock::new(subscribers)), failure: Arc::default() }
    }

    /// Adds or replaces a subscriber by id.
    pub async fn upsert(&self, subscriber: Subscriber) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(existing) = subscribers.iter_mut().find(|s| s.id == subscriber.id) {
            *existing = subscriber;
        } else {
            subscribers.push(subscriber);
        }
    }

    /// Flips the enabled flag of a subscriber. Returns false if it is unknown.
    pub async fn set_enabled(&self, id: SubscriberId, enabled: bool) -> bool {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.iter_mut().find(|s| s.id == id) {
            Some(subscriber) => {
                subscriber.enabled = enabled;
                true
            },
            None => false,
        }
    }

    /// Makes every subsequent read fail until `recover` is called.
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write().await = Some(message.into());
    }

    /// Clears an injected failure.
    pub async fn recover(&self) {
        *self.failure.write().await = None;
    }
}

#[async_trait]
impl SubscriberRegistry for InMemorySubscriberRegistry {
    async fn list_active(&self) -> Result<Vec<Subscriber>> {
        if let Some(message) = self.failure.read().await.clone() {
            return Err(CoreError::Unavailable(message));
        }
        Ok(self.subscribers.read().await.clone())
    }
}

/// Domain lookup backed by a map of records.
///
/// Counts lookups so tests can assert how often enrichment touched the
/// backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDomainLookup {
    records: Arc<RwLock<HashMap<(EntityKind, i64), DomainRecord>>>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryDomainLookup {
    /// Creates an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, keyed by its `id` field.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the value is not an object with an
    /// integer `id`.
    pub async fn insert(&self, entity: EntityKind, record: Value) -> Result<()> {
        let Value::Object(record) = record else {
            return Err(CoreError::InvalidInput(format!("{entity} record must be an object")));
        };
        let id = record.get("id").and_then(id_from_value).ok_or_else(|| {
            CoreError::InvalidInput(format!("{entity} record is missing an integer id"))
        })?;

        self.records.write().await.insert((entity, id), record);
        Ok(())
    }

    /// Number of `find_record` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DomainLookup for InMemoryDomainLookup {
    async fn find_record(
        &self,
        entity: EntityKind,
        id: i64,
        fields: &[&str],
    ) -> Result<DomainRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let records = self.records.read().await;
        let record = records.get(&(entity, id)).ok_or(CoreError::not_found(entity, id))?;

        if fields.is_empty() {
            return Ok(record.clone());
        }

        Ok(fields
            .iter()
            .filter_map(|field| record.get(*field).map(|value| ((*field).to_string(), value.clone())))
            .collect())
    }
}

/// Outcome recorder that keeps every outcome in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutcomeRecorder {
    outcomes: Arc<RwLock<Vec<DeliveryOutcome>>>,
}

impl InMemoryOutcomeRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded outcomes in recording order.
    pub async fn outcomes(&self) -> Vec<DeliveryOutcome> {
        self.outcomes.read().await.clone()
    }

    /// Outcomes recorded for one subscriber, in recording order.
    pub async fn outcomes_for(&self, subscriber_id: SubscriberId) -> Vec<DeliveryOutcome> {
        self.outcomes
            .read()
            .await
            .iter()
            .filter(|outcome| outcome.subscriber_id == subscriber_id)
            .cloned()
            .collect()
    }

    /// Number of recorded outcomes.
    pub async fn len(&self) -> usize {
        self.outcomes.read().await.len()
    }

    /// Returns true if nothing was recorded.
    pub async fn is_empty(&self) -> bool {
        self.outcomes.read().await.is_empty()
    }
}

#[async_trait]
impl OutcomeRecorder for InMemoryOutcomeRecorder {
    async fn record(&self, outcome: DeliveryOutcome) {
        self.outcomes.write().await.push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscriber(id: i64) -> Subscriber {
        serde_json::from_value(json!({
            "id": id,
            "enabled": true,
            "url": format!("https://hooks.example.com/{id}")
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn registry_failure_injection_and_recovery() {
        let registry = InMemorySubscriberRegistry::new(vec![subscriber(1)]);

        registry.fail_with("connection reset").await;
        let error = registry.list_active().await.unwrap_err();
        assert!(error.to_string().contains("connection reset"));

        registry.recover().await;
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registry_upsert_replaces_by_id() {
        let registry = InMemorySubscriberRegistry::default();
        registry.upsert(subscriber(1)).await;
        registry.upsert(subscriber(2)).await;

        let mut replacement = subscriber(1);
        replacement.url = "https://other.example.com".to_string();
        registry.upsert(replacement).await;

        let subscribers = registry.list_active().await.unwrap();
        assert_eq!(subscribers.len(), 2);
        assert_eq!(subscribers[0].url, "https://other.example.com");

        assert!(registry.set_enabled(SubscriberId(2), false).await);
        assert!(!registry.set_enabled(SubscriberId(99), false).await);
        assert!(!registry.list_active().await.unwrap()[1].enabled);
    }

    #[tokio::test]
    async fn lookup_projects_requested_fields() {
        let lookup = InMemoryDomainLookup::new();
        lookup
            .insert(EntityKind::User, json!({"id": 9, "firstname": "Ann", "lastname": "Lee", "email": "ann@example.org"}))
            .await
            .unwrap();

        let record = lookup.find_record(EntityKind::User, 9, &["id", "firstname"]).await.unwrap();
        assert_eq!(Value::Object(record), json!({"id": 9, "firstname": "Ann"}));

        let full = lookup.find_record(EntityKind::User, 9, &[]).await.unwrap();
        assert_eq!(full.len(), 4);
        assert_eq!(lookup.lookup_count(), 2);
    }

    #[tokio::test]
    async fn lookup_reports_missing_records() {
        let lookup = InMemoryDomainLookup::new();
        let error = lookup.find_record(EntityKind::Course, 3, &["id"]).await.unwrap_err();
        assert!(matches!(error, CoreError::NotFound { entity: EntityKind::Course, id: 3 }));
    }

    #[tokio::test]
    async fn lookup_rejects_records_without_id() {
        let lookup = InMemoryDomainLookup::new();
        assert!(lookup.insert(EntityKind::Quiz, json!({"name": "Midterm"})).await.is_err());
        assert!(lookup.insert(EntityKind::Quiz, json!([1, 2])).await.is_err());
    }
}
