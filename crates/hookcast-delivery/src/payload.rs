//! Outbound payload construction.
//!
//! A payload is the event's data with the delivery envelope keys laid over
//! it:
//!
//! ```text
//! { ...event.data, "eventname", "host", "token", "extra", "extra_event_data" }
//! ```
//!
//! Envelope keys win over same-named event data keys. Each (event,
//! subscriber) pair gets its own map; neither input is modified.

use bytes::Bytes;
use hookcast_core::{Event, Subscriber};
use reqwest::Url;
use serde_json::{Map, Value};

use crate::{
    enrich::ExtraEventData,
    error::{DeliveryError, Result},
};

/// Extracts the host name from the application base URL.
///
/// # Errors
///
/// Returns `DeliveryError::ConfigurationError` if the URL does not parse or
/// has no host.
pub fn host_from_base_url(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url)
        .map_err(|e| DeliveryError::configuration(format!("invalid app base URL {base_url}: {e}")))?;

    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| DeliveryError::configuration(format!("app base URL {base_url} has no host")))
}

/// JSON body sent to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPayload {
    body: Map<String, Value>,
}

impl OutboundPayload {
    /// The payload as a JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Looks up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Consumes the payload into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// Serialises the payload as a JSON request body.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::SerializationError` if encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(&self.body)
            .map(Bytes::from)
            .map_err(|e| DeliveryError::serialization(e.to_string()))
    }
}

/// Builds payloads for one configured host.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    host: String,
    embed_token: bool,
}

impl PayloadBuilder {
    /// Creates a builder for the host at `app_base_url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no host can be derived from the URL.
    pub fn new(app_base_url: &str, embed_token: bool) -> Result<Self> {
        Ok(Self { host: host_from_base_url(app_base_url)?, embed_token })
    }

    /// Host name placed in every payload.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds the payload for `subscriber`.
    ///
    /// The `token` key is left out entirely when token embedding is off.
    pub fn build(
        &self,
        event: &Event,
        subscriber: &Subscriber,
        extra_event_data: &ExtraEventData,
    ) -> OutboundPayload {
        let mut body = event.data.clone();
        body.insert("eventname".to_string(), Value::String(event.name.clone()));
        body.insert("host".to_string(), Value::String(self.host.clone()));
        if self.embed_token {
            body.insert("token".to_string(), Value::String(subscriber.auth_token.clone()));
        } else {
            body.remove("token");
        }
        body.insert("extra".to_string(), subscriber.extra.clone());
        body.insert("extra_event_data".to_string(), Value::Object(extra_event_data.clone()));

        OutboundPayload { body }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hookcast_core::SubscriberId;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn subscriber(token: &str) -> Subscriber {
        Subscriber {
            id: SubscriberId(5),
            enabled: true,
            url: "https://hooks.example.com/in".to_string(),
            content_type: "json".to_string(),
            auth_header_name: "X-Token".to_string(),
            auth_token: token.to_string(),
            subscribed_events: HashMap::new(),
            extra: json!({"tenant": "north"}),
        }
    }

    fn event(data: Value) -> Event {
        let Value::Object(data) = data else { panic!("event data must be an object") };
        Event::new("\\core\\event\\course_viewed", data)
    }

    #[test]
    fn host_is_hostname_of_base_url() {
        assert_eq!(host_from_base_url("https://lms.example.org/moodle").unwrap(), "lms.example.org");
        assert_eq!(host_from_base_url("http://localhost:8080").unwrap(), "localhost");
        assert!(host_from_base_url("not a url").is_err());
        assert!(host_from_base_url("mailto:admin@example.org").is_err());
    }

    #[test]
    fn payload_carries_event_data_and_envelope() {
        let builder = PayloadBuilder::new("https://lms.example.org/moodle", true).unwrap();
        let extra_event_data = Map::from_iter([("quiz".to_string(), json!({"id": 7}))]);

        let payload = builder.build(&event(json!({"courseid": 3})), &subscriber("s3cret"), &extra_event_data);

        assert_eq!(
            payload.into_value(),
            json!({
                "courseid": 3,
                "eventname": "\\core\\event\\course_viewed",
                "host": "lms.example.org",
                "token": "s3cret",
                "extra": {"tenant": "north"},
                "extra_event_data": {"quiz": {"id": 7}}
            })
        );
    }

    #[test]
    fn envelope_overrides_event_keys() {
        let builder = PayloadBuilder::new("https://lms.example.org", true).unwrap();
        let payload = builder.build(
            &event(json!({"host": "spoofed", "extra": 1, "userid": 9})),
            &subscriber(""),
            &Map::new(),
        );

        assert_eq!(payload.get("host"), Some(&json!("lms.example.org")));
        assert_eq!(payload.get("extra"), Some(&json!({"tenant": "north"})));
        assert_eq!(payload.get("token"), Some(&json!("")));
        assert_eq!(payload.get("userid"), Some(&json!(9)));
    }

    #[test]
    fn token_is_omitted_when_embedding_is_off() {
        let builder = PayloadBuilder::new("https://lms.example.org", false).unwrap();
        let payload = builder.build(&event(json!({"token": "from-event"})), &subscriber("s3cret"), &Map::new());
        assert!(payload.get("token").is_none());
    }

    #[test]
    fn inputs_are_not_modified() {
        let builder = PayloadBuilder::new("https://lms.example.org", true).unwrap();
        let event = event(json!({"courseid": 3}));
        let subscriber = subscriber("s3cret");
        let before = (event.clone(), subscriber.clone());

        let _ = builder.build(&event, &subscriber, &Map::new());

        assert_eq!((event, subscriber), before);
    }

    proptest! {
        #[test]
        fn event_keys_survive_unless_reserved(key in "[a-z]{1,12}", value in any::<i64>()) {
            let builder = PayloadBuilder::new("https://lms.example.org", true).unwrap();
            let data = Map::from_iter([(key.clone(), json!(value))]);
            let payload = builder.build(&event(Value::Object(data)), &subscriber("t"), &Map::new());

            let reserved = ["eventname", "host", "token", "extra"];
            if !reserved.contains(&key.as_str()) {
                prop_assert_eq!(payload.get(&key), Some(&json!(value)));
            }
            prop_assert_eq!(payload.as_map().len(), if reserved.contains(&key.as_str()) { 5 } else { 6 });
        }

        #[test]
        fn serialised_payload_parses_back(value in "[ -~]{0,64}") {
            let builder = PayloadBuilder::new("https://lms.example.org", true).unwrap();
            let payload = builder.build(&event(json!({"note": value})), &subscriber("t"), &Map::new());
            let parsed: Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(parsed, payload.into_value());
        }
    }
}
