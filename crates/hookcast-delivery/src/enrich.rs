//! Event-specific payload enrichment.
//!
//! Some events only carry ids. Enrichment rules resolve those ids into the
//! records a subscriber needs (names, titles) so receivers do not have to
//! call back into the host. Rules are looked up by exact event name; events
//! without a rule get an empty `extra_event_data` map.
//!
//! A rule either produces its whole output or fails. Partial payloads are
//! never sent.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use hookcast_core::{models::id_from_value, DomainLookup, DomainRecord, EntityKind, Event};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EnrichmentError;

/// Data added to a payload under `extra_event_data`.
pub type ExtraEventData = Map<String, Value>;

/// Event name of the host's quiz attempt submission.
pub const QUIZ_ATTEMPT_SUBMITTED: &str = "\\mod_quiz\\event\\attempt_submitted";

/// Builds `extra_event_data` for one event name.
#[async_trait]
pub trait EnrichmentRule: Send + Sync + fmt::Debug {
    /// Exact event name this rule handles.
    fn event_name(&self) -> &str;

    /// Resolves the event's references through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `EnrichmentError::MissingField` when the event lacks an id the
    /// rule needs and `EnrichmentError::Lookup` when a record cannot be read.
    async fn enrich(
        &self,
        event: &Event,
        lookup: &dyn DomainLookup,
    ) -> Result<ExtraEventData, EnrichmentError>;
}

/// Resolves quiz, course and submitting user for a submitted quiz attempt.
///
/// Reads `other.quizid`, `courseid` and `other.submitterid` from the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuizAttemptSubmitted;

#[async_trait]
impl EnrichmentRule for QuizAttemptSubmitted {
    fn event_name(&self) -> &str {
        QUIZ_ATTEMPT_SUBMITTED
    }

    async fn enrich(
        &self,
        event: &Event,
        lookup: &dyn DomainLookup,
    ) -> Result<ExtraEventData, EnrichmentError> {
        let quiz_id = required_id(event, event.other("quizid"), "other.quizid")?;
        let course_id = required_id(event, event.data.get("courseid"), "courseid")?;
        let user_id = required_id(event, event.other("submitterid"), "other.submitterid")?;

        let quiz = fetch(lookup, EntityKind::Quiz, quiz_id, &["id", "name"]).await?;
        let course = fetch(lookup, EntityKind::Course, course_id, &["id", "fullname"]).await?;
        let user = fetch(lookup, EntityKind::User, user_id, &["id", "firstname", "lastname"]).await?;

        let mut extra = ExtraEventData::new();
        extra.insert("quiz".to_string(), Value::Object(quiz));
        extra.insert("course".to_string(), Value::Object(course));
        extra.insert("user".to_string(), Value::Object(user));
        Ok(extra)
    }
}

fn required_id(
    event: &Event,
    value: Option<&Value>,
    field: &'static str,
) -> Result<i64, EnrichmentError> {
    value
        .and_then(id_from_value)
        .ok_or_else(|| EnrichmentError::MissingField { event_name: event.name.clone(), field })
}

async fn fetch(
    lookup: &dyn DomainLookup,
    entity: EntityKind,
    id: i64,
    fields: &[&str],
) -> Result<DomainRecord, EnrichmentError> {
    lookup
        .find_record(entity, id, fields)
        .await
        .map_err(|source| EnrichmentError::Lookup { entity, id, source })
}

/// Registry of enrichment rules keyed by event name.
#[derive(Debug, Clone)]
pub struct Enricher {
    rules: HashMap<String, Arc<dyn EnrichmentRule>>,
    lookup: Arc<dyn DomainLookup>,
}

impl Enricher {
    /// Creates an enricher with no rules.
    pub fn new(lookup: Arc<dyn DomainLookup>) -> Self {
        Self { rules: HashMap::new(), lookup }
    }

    /// Creates an enricher with the built-in rules registered.
    pub fn with_default_rules(lookup: Arc<dyn DomainLookup>) -> Self {
        let mut enricher = Self::new(lookup);
        enricher.register(Arc::new(QuizAttemptSubmitted));
        enricher
    }

    /// Registers a rule, returning the rule it replaced for the same event.
    pub fn register(&mut self, rule: Arc<dyn EnrichmentRule>) -> Option<Arc<dyn EnrichmentRule>> {
        self.rules.insert(rule.event_name().to_string(), rule)
    }

    /// Returns true if a rule exists for `event_name`.
    pub fn has_rule(&self, event_name: &str) -> bool {
        self.rules.contains_key(event_name)
    }

    /// Builds `extra_event_data` for `event`.
    ///
    /// # Errors
    ///
    /// Propagates the matching rule's error. Events without a rule never fail.
    pub async fn enrich(&self, event: &Event) -> Result<ExtraEventData, EnrichmentError> {
        match self.rules.get(&event.name) {
            Some(rule) => {
                debug!(event_name = %event.name, "enriching event");
                rule.enrich(event, self.lookup.as_ref()).await
            },
            None => Ok(ExtraEventData::new()),
        }
    }
}
