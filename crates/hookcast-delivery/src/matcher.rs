//! Subscription matching.
//!
//! A subscriber receives an event only when it is enabled and its
//! `subscribed_events` map holds a truthy value under the exact event name.
//! Values are loosely typed because hosts store subscription flags as
//! booleans, integers or strings interchangeably.

use hookcast_core::{Event, Subscriber};
use serde_json::Value;

/// Decides whether `event` should be delivered to `subscriber`.
pub fn matches(subscriber: &Subscriber, event: &Event) -> bool {
    subscriber.enabled && subscriber.subscription(&event.name).is_some_and(is_truthy)
}

/// Loose truthiness of a JSON value.
///
/// `false`, `null`, zero, `""`, `"0"` and empty arrays or objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hookcast_core::SubscriberId;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    use super::*;

    const SUBMITTED: &str = "\\mod_quiz\\event\\attempt_submitted";

    fn subscriber(enabled: bool, events: &[(&str, Value)]) -> Subscriber {
        Subscriber {
            id: SubscriberId(1),
            enabled,
            url: "https://hooks.example.com".to_string(),
            content_type: "json".to_string(),
            auth_header_name: String::new(),
            auth_token: String::new(),
            subscribed_events: events
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect::<HashMap<_, _>>(),
            extra: Value::Null,
        }
    }

    fn event(name: &str) -> Event {
        Event::new(name, Map::new())
    }

    #[test]
    fn enabled_truthy_subscription_matches() {
        let subscriber = subscriber(true, &[(SUBMITTED, json!(1))]);
        assert!(matches(&subscriber, &event(SUBMITTED)));
    }

    #[test]
    fn disabled_subscriber_never_matches() {
        let subscriber = subscriber(false, &[(SUBMITTED, json!(true))]);
        assert!(!matches(&subscriber, &event(SUBMITTED)));
    }

    #[test]
    fn absent_and_falsy_subscriptions_do_not_match() {
        let subscriber = subscriber(true, &[(SUBMITTED, json!("0"))]);
        assert!(!matches(&subscriber, &event(SUBMITTED)));
        assert!(!matches(&subscriber, &event("\\core\\event\\user_created")));
    }

    #[test]
    fn names_match_exactly() {
        let subscriber = subscriber(true, &[("\\mod_quiz\\event\\", json!(true))]);
        assert!(!matches(&subscriber, &event(SUBMITTED)));
    }

    #[test]
    fn truthiness_table() {
        for falsy in [json!(false), json!(null), json!(0), json!(0.0), json!(""), json!("0"), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(1), json!(-1), json!(0.5), json!("1"), json!("false"), json!("00"), json!([0]), json!({"a": 0})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    proptest! {
        #[test]
        fn disabled_subscribers_never_match(name in "[a-z_\\\\]{1,40}", flag in any::<bool>()) {
            let subscriber = subscriber(false, &[(name.as_str(), json!(flag))]);
            prop_assert!(!matches(&subscriber, &event(&name)));
        }

        #[test]
        fn integer_flags_match_unless_zero(name in "[a-z_\\\\]{1,40}", flag in any::<i64>()) {
            let subscriber = subscriber(true, &[(name.as_str(), json!(flag))]);
            prop_assert_eq!(matches(&subscriber, &event(&name)), flag != 0);
        }

        #[test]
        fn unrelated_event_names_never_match(
            subscribed in "[a-z]{1,20}",
            raised in "[A-Z]{1,20}",
        ) {
            let subscriber = subscriber(true, &[(subscribed.as_str(), json!(true))]);
            prop_assert!(!matches(&subscriber, &event(&raised)));
        }
    }
}
