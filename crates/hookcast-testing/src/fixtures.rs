//! Test data builders and fixtures.
//!
//! Builders start from values that make a delivery succeed against a mock
//! server, so tests only spell out what they are about.

use std::collections::HashMap;

use hookcast_core::{
    memory::InMemoryDomainLookup, CoreError, EntityKind, Event, Subscriber, SubscriberId,
};
use serde_json::{json, Map, Value};

/// Event name of the host's quiz attempt submission.
pub const QUIZ_ATTEMPT_SUBMITTED: &str = "\\mod_quiz\\event\\attempt_submitted";

/// An event without enrichment rules.
pub const COURSE_VIEWED: &str = "\\core\\event\\course_viewed";

/// Builder for test subscribers.
#[derive(Debug, Clone)]
pub struct SubscriberBuilder {
    subscriber: Subscriber,
}

impl SubscriberBuilder {
    /// Creates an enabled JSON subscriber for `url` with no subscriptions.
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            subscriber: Subscriber {
                id: SubscriberId(id),
                enabled: true,
                url: url.into(),
                content_type: "json".to_string(),
                auth_header_name: String::new(),
                auth_token: String::new(),
                subscribed_events: HashMap::new(),
                extra: Value::Null,
            },
        }
    }

    /// Subscribes to `event_name` with a `true` flag.
    #[must_use]
    pub fn subscribe(self, event_name: impl Into<String>) -> Self {
        self.subscribe_with(event_name, Value::Bool(true))
    }

    /// Subscribes to `event_name` with an arbitrary flag value.
    #[must_use]
    pub fn subscribe_with(mut self, event_name: impl Into<String>, flag: Value) -> Self {
        self.subscriber.subscribed_events.insert(event_name.into(), flag);
        self
    }

    /// Sets the auth header name and token.
    #[must_use]
    pub fn auth(mut self, header_name: impl Into<String>, token: impl Into<String>) -> Self {
        self.subscriber.auth_header_name = header_name.into();
        self.subscriber.auth_token = token.into();
        self
    }

    /// Sets the content subtype.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.subscriber.content_type = content_type.into();
        self
    }

    /// Sets the opaque `extra` passthrough.
    #[must_use]
    pub fn extra(mut self, extra: Value) -> Self {
        self.subscriber.extra = extra;
        self
    }

    /// Marks the subscriber disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.subscriber.enabled = false;
        self
    }

    /// Builds the subscriber.
    pub fn build(self) -> Subscriber {
        self.subscriber
    }
}

/// Builder for test events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    name: String,
    data: Map<String, Value>,
}

impl EventBuilder {
    /// Creates an event with the given name and no data.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), data: Map::new() }
    }

    /// Sets `courseid`.
    #[must_use]
    pub fn course(self, course_id: i64) -> Self {
        self.data("courseid", json!(course_id))
    }

    /// Sets `userid`.
    #[must_use]
    pub fn user(self, user_id: i64) -> Self {
        self.data("userid", json!(user_id))
    }

    /// Sets a key inside the `other` section.
    #[must_use]
    pub fn other(mut self, key: impl Into<String>, value: Value) -> Self {
        let other = self.data.entry("other").or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(other) = other {
            other.insert(key.into(), value);
        }
        self
    }

    /// Sets a top-level data key.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Builds the event.
    pub fn build(self) -> Event {
        Event::new(self.name, self.data)
    }
}

/// A quiz attempt submission referencing quiz 7, course 3 and user 9.
pub fn quiz_attempt_submitted() -> Event {
    EventBuilder::new(QUIZ_ATTEMPT_SUBMITTED)
        .course(3)
        .user(9)
        .other("quizid", json!(7))
        .other("submitterid", json!(9))
        .build()
}

/// `extra_event_data` expected for [`quiz_attempt_submitted`].
pub fn quiz_attempt_extra_event_data() -> Value {
    json!({
        "quiz": {"id": 7, "name": "Midterm"},
        "course": {"id": 3, "fullname": "Biology 101"},
        "user": {"id": 9, "firstname": "Ann", "lastname": "Lee"}
    })
}

/// Lookup holding the records [`quiz_attempt_submitted`] refers to.
///
/// Records carry extra columns so tests can see that only the requested
/// fields are returned.
///
/// # Errors
///
/// Returns an error if a record cannot be stored.
pub async fn seeded_quiz_lookup() -> Result<InMemoryDomainLookup, CoreError> {
    let lookup = InMemoryDomainLookup::new();
    lookup
        .insert(EntityKind::Quiz, json!({"id": 7, "name": "Midterm", "course": 3, "grade": 10}))
        .await?;
    lookup
        .insert(
            EntityKind::Course,
            json!({"id": 3, "fullname": "Biology 101", "shortname": "BIO101"}),
        )
        .await?;
    lookup
        .insert(
            EntityKind::User,
            json!({"id": 9, "firstname": "Ann", "lastname": "Lee", "email": "ann@example.org"}),
        )
        .await?;
    Ok(lookup)
}
