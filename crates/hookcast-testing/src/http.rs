//! HTTP mocking utilities for webhook testing.
//!
//! Wraps a wiremock server that plays the subscriber side of a delivery and
//! exposes what it received as parsed requests.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// HTTP mock server standing in for a webhook subscriber.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the full URL for `path`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Configures `path` to answer every POST with `response`.
    pub async fn mock_simple(&self, path: impl Into<String>, response: MockResponse) {
        self.mock_endpoint(MockEndpoint { path: path.into(), expected_headers: HashMap::new(), response })
            .await;
    }

    /// Configures an endpoint to return a specific response.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) {
        let mut mock = Mock::given(method("POST")).and(path(endpoint.path.clone()));

        for (key, value) in &endpoint.expected_headers {
            mock = mock.and(header(key.as_str(), value.as_str()));
        }

        mock.respond_with(endpoint.response.into_template()).mount(&self.server).await;
    }

    /// Answers POSTs to `path` with `responses` in order, one each.
    ///
    /// Requests beyond the sequence get wiremock's default 404.
    pub async fn mock_sequence(&self, path: &str, responses: Vec<MockResponse>) {
        for response in responses {
            Mock::given(method("POST"))
                .and(wiremock::matchers::path(path))
                .respond_with(response.into_template())
                .up_to_n_times(1)
                .mount(&self.server)
                .await;
        }
    }

    /// Configures every path to fail with the given status code.
    pub async fn mock_endpoint_always_fail(&self, status: u16) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Returns all requests received by the server, in arrival order.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Configuration for a mock endpoint.
pub struct MockEndpoint {
    /// Path the endpoint answers on.
    pub path: String,
    /// Headers a request must carry to match.
    pub expected_headers: HashMap<String, String>,
    /// Response to send.
    pub response: MockResponse,
}

impl MockEndpoint {
    /// Creates a mock endpoint that returns success.
    pub fn success(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_headers: HashMap::new(),
            response: MockResponse::Success { status: StatusCode::OK, body: Bytes::new() },
        }
    }

    /// Creates a mock endpoint that returns a failure.
    pub fn failure(path: impl Into<String>, status: StatusCode) -> Self {
        Self {
            path: path.into(),
            expected_headers: HashMap::new(),
            response: MockResponse::Failure { status, retry_after: None },
        }
    }

    /// Adds an expected header to the mock.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_headers.insert(key.into(), value.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        if let MockResponse::Success { status, .. } = self.response {
            self.response = MockResponse::Success { status, body: body.into() };
        }
        self
    }

    /// Sets a retry-after header for rate limiting scenarios.
    #[must_use]
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        if let MockResponse::Failure { status, .. } = self.response {
            self.response = MockResponse::Failure { status, retry_after: Some(duration) };
        }
        self
    }
}

/// Types of mock responses.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Responds with `status` and `body`.
    Success {
        /// Status code to return
        status: StatusCode,
        /// Body to return
        body: Bytes,
    },
    /// Responds with an error status and optional `Retry-After`.
    Failure {
        /// Status code to return
        status: StatusCode,
        /// Value for the `Retry-After` header
        retry_after: Option<Duration>,
    },
    /// Holds the response for `delay`, long enough to trip client timeouts.
    Timeout {
        /// How long to wait before answering
        delay: Duration,
    },
}

impl MockResponse {
    /// 200 with an empty body.
    pub fn ok() -> Self {
        Self::Success { status: StatusCode::OK, body: Bytes::new() }
    }

    /// Error response with the given status.
    pub fn status(status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::Failure { status, retry_after: None }
    }

    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } => {
                ResponseTemplate::new(status.as_u16()).set_body_bytes(body.to_vec())
            },
            Self::Failure { status, retry_after } => {
                let mut response = ResponseTemplate::new(status.as_u16());
                if let Some(delay) = retry_after {
                    response = response.insert_header("Retry-After", delay.as_secs().to_string());
                }
                response
            },
            Self::Timeout { delay } => ResponseTemplate::new(StatusCode::OK.as_u16()).set_delay(delay),
        }
    }
}

/// A request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// HTTP assertions for webhook testing.
pub mod assertions {
    use super::*;

    /// Asserts that a request contains the expected header.
    pub fn assert_header_present(request: &RecordedRequest, key: &str, value: &str) {
        let header_value =
            request.header(key).unwrap_or_else(|| panic!("Header '{key}' not present"));

        assert_eq!(header_value, value, "Header '{key}' has unexpected value");
    }

    /// Asserts that a request does not contain a header.
    pub fn assert_header_absent(request: &RecordedRequest, key: &str) {
        assert!(request.headers.get(key).is_none(), "Header '{key}' unexpectedly present");
    }

    /// Asserts that the request body matches expected JSON.
    pub fn assert_json_body(request: &RecordedRequest, expected: &Value) {
        let actual = request.json().unwrap_or_else(|| panic!("Request body is not JSON"));

        assert_eq!(actual, *expected, "Request body does not match expected JSON");
    }
}
