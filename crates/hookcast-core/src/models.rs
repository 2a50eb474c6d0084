//! Core domain models and strongly-typed identifiers.
//!
//! Defines host events, webhook subscribers, delivery outcomes and the
//! domain record shapes used by enrichment. Events and subscribers are read
//! only for the lifetime of a dispatch; outcomes are produced once per
//! delivery attempt and handed straight to the outcome recorder.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// A record fetched from the host application's domain tables.
pub type DomainRecord = Map<String, Value>;

/// Strongly-typed subscriber identifier.
///
/// Subscribers are keyed by the integer id the host's registry assigns them.
///
/// # Example
///
/// ```
/// use hookcast_core::models::SubscriberId;
/// let id = SubscriberId(42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SubscriberId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for SubscriberId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriberId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriberId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A named occurrence raised by the host application.
///
/// On the wire an event is the host's flat event record: `eventname` carries
/// the event type and every other key is event data.
///
/// ```
/// use hookcast_core::models::Event;
///
/// let event: Event = serde_json::from_str(
///     r#"{"eventname": "\\core\\event\\user_created", "courseid": 3, "userid": 9}"#,
/// )
/// .unwrap();
///
/// assert_eq!(event.name, "\\core\\event\\user_created");
/// assert_eq!(event.course_id(), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Namespaced event type.
    #[serde(rename = "eventname")]
    pub name: String,

    /// Event data as raised by the host.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Creates an event from a name and its data mapping.
    pub fn new(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self { name: name.into(), data }
    }

    /// Course the event happened in, if the host supplied one.
    pub fn course_id(&self) -> Option<i64> {
        self.data.get("courseid").and_then(id_from_value)
    }

    /// Looks up a key in the event's `other` section.
    pub fn other(&self, key: &str) -> Option<&Value> {
        self.data.get("other").and_then(|other| other.get(key))
    }
}

/// Reads a record id out of a JSON value.
///
/// Hosts serialise ids either as numbers or as numeric strings.
pub fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// A registered webhook target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Registry identifier.
    pub id: SubscriberId,

    /// Disabled subscribers never receive deliveries.
    pub enabled: bool,

    /// Destination endpoint.
    pub url: String,

    /// Media subtype sent as `application/<content_type>`.
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Name of the header carrying `auth_token`.
    #[serde(default)]
    pub auth_header_name: String,

    /// Credential sent to the subscriber. Empty means no auth header.
    #[serde(default)]
    pub auth_token: String,

    /// Event names this subscriber wants, keyed by name.
    ///
    /// Values are interpreted loosely: only truthy values subscribe.
    #[serde(default)]
    pub subscribed_events: HashMap<String, Value>,

    /// Opaque data attached to every delivery for this subscriber.
    #[serde(default)]
    pub extra: Value,
}

fn default_content_type() -> String {
    "json".to_string()
}

impl Subscriber {
    /// Returns true when deliveries should carry an auth header.
    pub fn has_auth_token(&self) -> bool {
        !self.auth_token.is_empty()
    }

    /// Raw subscription flag for an event name.
    pub fn subscription(&self, event_name: &str) -> Option<&Value> {
        self.subscribed_events.get(event_name)
    }
}

/// Final state of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Subscriber answered with a 2xx status.
    Delivered,
    /// Subscriber answered with a non-2xx status.
    Rejected,
    /// No response was obtained: enrichment, configuration or transport
    /// failure.
    Failed,
}

impl OutcomeStatus {
    /// Stable string form used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(Self::Delivered),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown outcome status: {other}")),
        }
    }
}

/// Result of one delivery attempt to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Unique id of this attempt, also sent to the subscriber.
    pub delivery_id: Uuid,
    /// Subscriber the attempt was made for.
    pub subscriber_id: SubscriberId,
    /// Name of the event being delivered.
    pub event_name: String,
    /// 1-based attempt number within one dispatch.
    pub attempt_number: u32,
    /// Classification of the attempt.
    pub status: OutcomeStatus,
    /// HTTP status returned by the subscriber, if any.
    pub response_status: Option<u16>,
    /// Response body returned by the subscriber, if any.
    pub response_body: Option<String>,
    /// Failure description when no usable response was obtained.
    pub error: Option<String>,
    /// Wall time spent on the attempt.
    pub duration: Duration,
    /// When the outcome was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Kinds of host records enrichment rules can look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A quiz activity.
    Quiz,
    /// A course.
    Course,
    /// A user account.
    User,
}

impl EntityKind {
    /// Host table holding records of this kind, without prefix.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Course => "course",
            Self::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
