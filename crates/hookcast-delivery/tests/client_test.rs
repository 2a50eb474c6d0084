//! Integration tests for the HTTP delivery client.
//!
//! Covers the wire contract seen by a subscriber: method, headers, body and
//! how responses of every kind turn into outcomes.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hookcast_core::{Clock, OutcomeStatus, TestClock};
use hookcast_delivery::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    retry::AttemptFailure,
    DeliveryError,
};
use hookcast_testing::{http::assertions, MockEndpoint, MockResponse, MockServer, SubscriberBuilder};
use http::StatusCode;
use serde_json::json;
use uuid::Uuid;

fn client(timeout: Duration) -> DeliveryClient {
    let config = ClientConfig { timeout, ..Default::default() };
    DeliveryClient::new(config, Arc::new(TestClock::new())).expect("Failed to create client")
}

#[tokio::test]
async fn posts_body_with_content_type_and_user_agent() {
    let server = MockServer::start().await;
    server.mock_simple("/webhook", MockResponse::ok()).await;

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook"))
        .content_type("vnd.example+json")
        .build();
    let body = Bytes::from(json!({"eventname": "x"}).to_string());

    let result = client(Duration::from_secs(5)).attempt(&subscriber, "x", body, 1).await;
    assert_eq!(result.outcome.status, OutcomeStatus::Delivered);

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/webhook");
    assertions::assert_header_present(&requests[0], "content-type", "application/vnd.example+json");
    assert!(requests[0].header("user-agent").unwrap_or_default().starts_with("hookcast/"));
    assertions::assert_json_body(&requests[0], &json!({"eventname": "x"}));
}

#[tokio::test]
async fn response_body_and_status_are_captured() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/webhook").with_body("accepted")).await;

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook")).build();
    let request =
        DeliveryRequest::for_subscriber(Uuid::new_v4(), &subscriber, Bytes::new(), 1).unwrap();

    let response = client(Duration::from_secs(5)).deliver(&request).await.expect("Delivery should succeed");

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, "accepted");
    assert!(response.is_success);
}

#[tokio::test]
async fn timeout_is_reported_as_timeout_error() {
    let server = MockServer::start().await;
    server.mock_simple("/webhook", MockResponse::Timeout { delay: Duration::from_secs(5) }).await;

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook")).build();
    let request =
        DeliveryRequest::for_subscriber(Uuid::new_v4(), &subscriber, Bytes::new(), 1).unwrap();

    let error = client(Duration::from_millis(100)).deliver(&request).await.unwrap_err();

    assert!(matches!(error, DeliveryError::Timeout { timeout_ms: 100 }));
    assert_eq!(error.to_string(), "request timeout after 100ms");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn retry_after_is_surfaced_on_rate_limit() {
    let server = MockServer::start().await;
    server
        .mock_endpoint(
            MockEndpoint::failure("/webhook", StatusCode::TOO_MANY_REQUESTS)
                .with_retry_after(Duration::from_secs(30)),
        )
        .await;

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook")).build();
    let result =
        client(Duration::from_secs(5)).attempt(&subscriber, "x", Bytes::new(), 2).await;

    assert_eq!(result.outcome.status, OutcomeStatus::Rejected);
    assert_eq!(result.outcome.attempt_number, 2);
    match result.failure {
        Some(AttemptFailure::Response { status_code, retry_after_seconds }) => {
            assert_eq!(status_code, 429);
            assert_eq!(retry_after_seconds, Some(30));
        },
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn auth_header_matches_subscriber_configuration() {
    let server = MockServer::start().await;
    server
        .mock_endpoint(MockEndpoint::success("/webhook").with_header("X-Moodle-Token", "abc123"))
        .await;

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook"))
        .auth("X-Moodle-Token", "abc123")
        .build();
    let result = client(Duration::from_secs(5)).attempt(&subscriber, "x", Bytes::new(), 1).await;

    assert_eq!(result.outcome.status, OutcomeStatus::Delivered);
}

#[tokio::test]
async fn outcome_timestamps_come_from_the_clock() {
    let server = MockServer::start().await;
    server.mock_simple("/webhook", MockResponse::ok()).await;

    let clock = TestClock::new();
    clock.advance(Duration::from_secs(3600));
    let client = DeliveryClient::new(ClientConfig::default(), Arc::new(clock.clone())).unwrap();

    let subscriber = SubscriberBuilder::new(1, server.endpoint_url("/webhook")).build();
    let result = client.attempt(&subscriber, "x", Bytes::new(), 1).await;

    assert_eq!(result.outcome.recorded_at, clock.now_utc());
}
