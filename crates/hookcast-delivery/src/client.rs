//! HTTP client for webhook delivery.
//!
//! Turns a subscriber and a serialised payload into an authenticated POST,
//! and the response (or the lack of one) into a `DeliveryOutcome`. Transport
//! failures never escape as errors from `attempt`; they become failed
//! outcomes the dispatcher records like any other.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookcast_core::{Clock, DeliveryOutcome, OutcomeStatus, Subscriber, SubscriberId};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Response, Url,
};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, ErrorCategory, Result},
    retry::AttemptFailure,
};

/// Header carrying the unique id of each attempt.
pub const DELIVERY_ID_HEADER: &str = "x-hookcast-delivery-id";

/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "x-hookcast-attempt";

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a whole request, connect to last body byte.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: format!("hookcast/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client shared by all deliveries of a dispatcher.
///
/// Wraps a pooled `reqwest::Client`, so cloning is cheap and connections to
/// the same subscriber are reused across events.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

/// A fully prepared request to one subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Unique identifier for this delivery attempt.
    pub delivery_id: Uuid,
    /// Subscriber the request is for.
    pub subscriber_id: SubscriberId,
    /// Destination URL.
    pub url: Url,
    /// Content type, auth and delivery metadata headers.
    pub headers: HeaderMap,
    /// Serialised payload.
    pub body: Bytes,
    /// Attempt number for this delivery.
    pub attempt_number: u32,
}

impl DeliveryRequest {
    /// Prepares the request for `subscriber`.
    ///
    /// Sets `Content-Type: application/<content_type>` and, when the
    /// subscriber has a token, `<auth_header_name>: <auth_token>`. An empty
    /// header name falls back to `Authorization`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL is not an
    /// absolute http(s) URL or a header name or value is invalid.
    pub fn for_subscriber(
        delivery_id: Uuid,
        subscriber: &Subscriber,
        body: Bytes,
        attempt_number: u32,
    ) -> Result<Self> {
        let url = Url::parse(&subscriber.url).map_err(|e| {
            DeliveryError::configuration(format!("invalid subscriber URL {}: {e}", subscriber.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();

        let content_type = format!("application/{}", subscriber.content_type.trim());
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&content_type).map_err(|_| {
                DeliveryError::configuration(format!("invalid content type: {content_type}"))
            })?,
        );

        if subscriber.has_auth_token() {
            let name = match subscriber.auth_header_name.trim() {
                "" => AUTHORIZATION,
                name => HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    DeliveryError::configuration(format!("invalid auth header name: {name}"))
                })?,
            };
            let mut value = HeaderValue::from_str(&subscriber.auth_token).map_err(|_| {
                DeliveryError::configuration("auth token is not a valid header value")
            })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        headers.insert(DELIVERY_ID_HEADER, header_value(delivery_id.to_string())?);
        headers.insert(ATTEMPT_HEADER, header_value(attempt_number.to_string())?);

        Ok(Self { delivery_id, subscriber_id: subscriber.id, url, headers, body, attempt_number })
    }
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(|e| DeliveryError::internal(e.to_string()))
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

/// Outcome of one attempt plus the failure that caused it, if any.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    /// Outcome to record.
    pub outcome: DeliveryOutcome,
    /// Present unless the subscriber answered 2xx.
    pub failure: Option<AttemptFailure>,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends one prepared request.
    ///
    /// Any HTTP response, whatever its status, is `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` when the request timed out and
    /// `DeliveryError::NetworkError` for connection, DNS and other transport
    /// failures.
    pub async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = self.clock.now();

        let span = info_span!(
            "webhook_delivery",
            subscriber_id = %request.subscriber_id,
            delivery_id = %request.delivery_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("Starting webhook delivery");

            let http_request = self
                .client
                .post(request.url.clone())
                .headers(request.headers.clone())
                .body(request.body.clone());

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = self.clock.now().saturating_duration_since(start_time);
                    tracing::warn!(duration_ms = duration.as_millis(), "Request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let delivery_response = self.parse_response(response, start_time).await;

            match delivery_response.status_code {
                200..=299 => {
                    tracing::info!(
                        status = delivery_response.status_code,
                        duration_ms = delivery_response.duration.as_millis(),
                        "Webhook delivered successfully"
                    );
                },
                400..=499 => {
                    tracing::warn!(status = delivery_response.status_code, "Client error response");
                },
                500..=599 => {
                    tracing::warn!(status = delivery_response.status_code, "Server error response");
                },
                _ => {
                    tracing::warn!(
                        status = delivery_response.status_code,
                        "Unexpected status code"
                    );
                },
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    /// Makes one delivery attempt to `subscriber` and describes the result.
    ///
    /// Never fails: request preparation and transport errors are reported as
    /// `Failed` outcomes, non-2xx responses as `Rejected`.
    pub async fn attempt(
        &self,
        subscriber: &Subscriber,
        event_name: &str,
        body: Bytes,
        attempt_number: u32,
    ) -> AttemptResult {
        let delivery_id = Uuid::new_v4();
        let start_time = self.clock.now();
        let outcome = OutcomeDraft { delivery_id, subscriber_id: subscriber.id, event_name, attempt_number };

        let result = match DeliveryRequest::for_subscriber(delivery_id, subscriber, body, attempt_number) {
            Ok(request) => self.deliver(&request).await,
            Err(e) => Err(e),
        };
        let now = self.clock.now_utc();

        match result {
            Ok(response) => {
                let failure = (!response.is_success).then(|| AttemptFailure::Response {
                    status_code: response.status_code,
                    retry_after_seconds: retry_after_seconds(&response.headers, now),
                });
                let status =
                    if response.is_success { OutcomeStatus::Delivered } else { OutcomeStatus::Rejected };
                AttemptResult {
                    outcome: outcome.finish(
                        status,
                        Some(response.status_code),
                        Some(response.body),
                        None,
                        response.duration,
                        now,
                    ),
                    failure,
                }
            },
            Err(error) => {
                tracing::warn!(
                    subscriber_id = %subscriber.id,
                    delivery_id = %delivery_id,
                    category = %ErrorCategory::from(&error),
                    error = %error,
                    "Delivery attempt failed"
                );
                let duration = self.clock.now().saturating_duration_since(start_time);
                AttemptResult {
                    outcome: outcome.finish(
                        OutcomeStatus::Failed,
                        None,
                        None,
                        Some(error.to_string()),
                        duration,
                        now,
                    ),
                    failure: Some(AttemptFailure::Transport(error)),
                }
            },
        }
    }

    async fn parse_response(
        &self,
        mut response: Response,
        start_time: std::time::Instant,
    ) -> DeliveryResponse {
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();

        let headers = extract_headers(response.headers());

        let body = match read_capped_body(&mut response).await {
            Ok((bytes, truncated)) => body_text(&bytes, truncated),
            Err(e) => {
                tracing::warn!("Failed to read response body: {}", e);
                format!("[Failed to read response body: {e}]")
            },
        };
        let duration = self.clock.now().saturating_duration_since(start_time);

        DeliveryResponse { status_code, headers, body, duration, is_success }
    }
}

struct OutcomeDraft<'a> {
    delivery_id: Uuid,
    subscriber_id: SubscriberId,
    event_name: &'a str,
    attempt_number: u32,
}

impl OutcomeDraft<'_> {
    fn finish(
        self,
        status: OutcomeStatus,
        response_status: Option<u16>,
        response_body: Option<String>,
        error: Option<String>,
        duration: Duration,
        recorded_at: DateTime<Utc>,
    ) -> DeliveryOutcome {
        DeliveryOutcome {
            delivery_id: self.delivery_id,
            subscriber_id: self.subscriber_id,
            event_name: self.event_name.to_string(),
            attempt_number: self.attempt_number,
            status,
            response_status,
            response_body,
            error,
            duration,
            recorded_at,
        }
    }
}

/// Reads at most 64 KiB of the body, reporting whether more was sent.
async fn read_capped_body(response: &mut Response) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let remaining = MAX_RESPONSE_BODY_SIZE - body.len();
        if chunk.len() > remaining {
            body.extend_from_slice(&chunk[..remaining]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn body_text(bytes: &[u8], truncated: bool) -> String {
    let text = String::from_utf8_lossy(bytes);
    if truncated {
        format!("{text}{TRUNCATION_SUFFIX}")
    } else {
        text.into_owned()
    }
}

fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.to_string(), value_str.to_string());
        }
    }

    headers
}

/// Reads a `Retry-After` header in either delay-seconds or HTTP-date form.
///
/// Header names are expected lower-case, as `extract_headers` produces them.
/// Dates in the past and unparsable values yield `None`.
pub fn retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let retry_after = headers.get("retry-after")?.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    let retry_time = DateTime::parse_from_rfc2822(retry_after).ok()?.with_timezone(&Utc);
    retry_time.signed_duration_since(now).to_std().ok().map(|delay| delay.as_secs())
}
