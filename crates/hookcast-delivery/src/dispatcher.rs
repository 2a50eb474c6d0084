//! Per-event dispatch orchestration.
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌────────┐   ┌──────────────┐   ┌────────┐
//! │ registry │──▶│ match │──▶│ enrich │──▶│ send (retry) │──▶│ record │
//! └──────────┘   └───────┘   └────────┘   └──────────────┘   └────────┘
//!                    │ no
//!                    ▼
//!                  skip
//! ```
//!
//! Only a registry failure aborts a dispatch. Everything after it is
//! per-subscriber: enrichment errors, bad subscriber settings and transport
//! failures are logged, recorded as failed outcomes and counted in the
//! report, while the remaining subscribers are delivered normally.
//!
//! Enrichment depends only on the event, so it runs once per dispatch and
//! only when somebody matched.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{stream, StreamExt};
use hookcast_core::{
    Clock, DeliveryOutcome, DomainLookup, Event, OutcomeRecorder, OutcomeStatus, RealClock,
    Subscriber, SubscriberRegistry,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    client::{ClientConfig, DeliveryClient},
    enrich::{Enricher, ExtraEventData},
    error::{DeliveryError, DispatchError, EnrichmentError},
    matcher,
    payload::PayloadBuilder,
    retry::{RetryContext, RetryDecision, RetryPolicy},
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL of the host application; its host name goes into payloads.
    pub app_base_url: String,

    /// Upper bound on deliveries in flight for one event.
    pub max_concurrent_deliveries: usize,

    /// Whether payloads carry the subscriber's token under `token`.
    pub embed_token_in_body: bool,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy applied to every subscriber.
    pub retry_policy: RetryPolicy,
}

impl DispatchConfig {
    /// Creates a configuration with defaults for the given host.
    pub fn new(app_base_url: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            max_concurrent_deliveries: crate::DEFAULT_MAX_CONCURRENT_DELIVERIES,
            embed_token_in_body: true,
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Summary of one dispatch.
///
/// `delivered`, `rejected` and `failed` count the final outcome per matched
/// subscriber, so they always add up to `matched`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Event that was dispatched.
    pub event_name: String,
    /// Subscribers returned by the registry.
    pub considered: usize,
    /// Subscribers that wanted the event.
    pub matched: usize,
    /// Subscribers that answered 2xx.
    pub delivered: usize,
    /// Subscribers that answered with another status.
    pub rejected: usize,
    /// Subscribers that could not be reached or prepared for.
    pub failed: usize,
}

impl DispatchReport {
    fn new(event_name: &str, considered: usize, matched: usize) -> Self {
        Self { event_name: event_name.to_string(), considered, matched, ..Self::default() }
    }

    fn count(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Delivered => self.delivered += 1,
            OutcomeStatus::Rejected => self.rejected += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
    }

    /// Returns true if every matched subscriber accepted the event.
    pub fn all_delivered(&self) -> bool {
        self.delivered == self.matched
    }
}

/// Delivers events to the subscribers that want them.
///
/// Holds only injected collaborators and configuration; one instance serves
/// any number of concurrent `dispatch` calls.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<dyn SubscriberRegistry>,
    enricher: Arc<Enricher>,
    recorder: Arc<dyn OutcomeRecorder>,
    client: DeliveryClient,
    payloads: PayloadBuilder,
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a dispatcher with the built-in enrichment rules.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the base URL has no
    /// host or the HTTP client cannot be built.
    pub fn new(
        config: DispatchConfig,
        registry: Arc<dyn SubscriberRegistry>,
        lookup: Arc<dyn DomainLookup>,
        recorder: Arc<dyn OutcomeRecorder>,
    ) -> Result<Self, DeliveryError> {
        Self::with_enricher(
            config,
            registry,
            Enricher::with_default_rules(lookup),
            recorder,
            Arc::new(RealClock::new()),
        )
    }

    /// Creates a dispatcher with a custom enricher and clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the base URL has no
    /// host or the HTTP client cannot be built.
    pub fn with_enricher(
        config: DispatchConfig,
        registry: Arc<dyn SubscriberRegistry>,
        enricher: Enricher,
        recorder: Arc<dyn OutcomeRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DeliveryError> {
        let payloads = PayloadBuilder::new(&config.app_base_url, config.embed_token_in_body)?;
        let client = DeliveryClient::new(config.client_config.clone(), clock.clone())?;

        Ok(Self {
            registry,
            enricher: Arc::new(enricher),
            recorder,
            client,
            payloads,
            config,
            clock,
        })
    }

    /// Dispatcher configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Delivers `event` to every enabled subscriber that subscribed to it.
    ///
    /// Every delivery attempt is recorded, including attempts that failed
    /// before a request was sent. Calling this twice with the same event
    /// delivers twice.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Registry` if the subscriber list cannot be
    /// loaded. Nothing is delivered or recorded in that case.
    pub async fn dispatch(&self, event: &Event) -> Result<DispatchReport, DispatchError> {
        let span = info_span!("dispatch", event_name = %event.name);

        async move {
            let subscribers = self.registry.list_active().await.map_err(|e| {
                warn!(error = %e, "Failed to load subscribers");
                DispatchError::Registry(e)
            })?;

            let matched: Vec<&Subscriber> =
                subscribers.iter().filter(|subscriber| matcher::matches(subscriber, event)).collect();

            let mut report = DispatchReport::new(&event.name, subscribers.len(), matched.len());
            if matched.is_empty() {
                debug!(considered = report.considered, "No subscribers for event");
                return Ok(report);
            }

            info!(considered = report.considered, matched = report.matched, "Dispatching event");

            let enrichment = self.enricher.enrich(event).await;
            if let Err(e) = &enrichment {
                warn!(error = %e, "Event enrichment failed");
            }

            let limit = self.config.max_concurrent_deliveries.max(1);
            let deliveries: Vec<_> = matched
                .into_iter()
                .map(|subscriber| self.deliver_to(event, subscriber, &enrichment))
                .collect();
            let statuses: Vec<OutcomeStatus> = stream::iter(deliveries)
                .buffer_unordered(limit)
                .collect()
                .await;

            for status in statuses {
                report.count(status);
            }

            info!(
                delivered = report.delivered,
                rejected = report.rejected,
                failed = report.failed,
                "Dispatch complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Runs all attempts for one subscriber and returns the final status.
    async fn deliver_to(
        &self,
        event: &Event,
        subscriber: &Subscriber,
        enrichment: &Result<ExtraEventData, EnrichmentError>,
    ) -> OutcomeStatus {
        let span = info_span!("subscriber_delivery", subscriber_id = %subscriber.id);

        async move {
            let extra_event_data = match enrichment {
                Ok(extra_event_data) => extra_event_data,
                Err(e) => return self.record_failure(event, subscriber, e.to_string()).await,
            };

            let body = match self.payloads.build(event, subscriber, extra_event_data).to_bytes() {
                Ok(body) => body,
                Err(e) => return self.record_failure(event, subscriber, e.to_string()).await,
            };

            self.deliver_with_retry(event, subscriber, body).await
        }
        .instrument(span)
        .await
    }

    async fn deliver_with_retry(
        &self,
        event: &Event,
        subscriber: &Subscriber,
        body: Bytes,
    ) -> OutcomeStatus {
        let policy = &self.config.retry_policy;
        let mut attempt_number = 1;

        loop {
            let result =
                self.client.attempt(subscriber, &event.name, body.clone(), attempt_number).await;
            let status = result.outcome.status;
            self.recorder.record(result.outcome).await;

            let Some(failure) = result.failure else {
                return status;
            };

            match RetryContext::new(attempt_number, &failure, policy).decide_retry() {
                RetryDecision::Retry { delay } => {
                    debug!(
                        attempt = attempt_number,
                        delay_ms = duration_ms(delay),
                        failure = %failure,
                        "Retrying delivery"
                    );
                    self.clock.sleep(delay).await;
                    attempt_number += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    if policy.retries_enabled() {
                        debug!(attempt = attempt_number, reason = %reason, "Giving up on delivery");
                    }
                    return status;
                },
            }
        }
    }

    /// Records a failure that happened before any request could be sent.
    async fn record_failure(
        &self,
        event: &Event,
        subscriber: &Subscriber,
        error: String,
    ) -> OutcomeStatus {
        warn!(error = %error, "Delivery not attempted");

        self.recorder
            .record(DeliveryOutcome {
                delivery_id: Uuid::new_v4(),
                subscriber_id: subscriber.id,
                event_name: event.name.clone(),
                attempt_number: 1,
                status: OutcomeStatus::Failed,
                response_status: None,
                response_body: None,
                error: Some(error),
                duration: Duration::ZERO,
                recorded_at: self.clock.now_utc(),
            })
            .await;

        OutcomeStatus::Failed
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use hookcast_core::{
        memory::{InMemoryDomainLookup, InMemoryOutcomeRecorder, InMemorySubscriberRegistry},
        SubscriberId, TestClock,
    };
    use serde_json::{json, Map, Value};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    const EVENT: &str = "\\core\\event\\course_viewed";

    fn subscriber(id: i64, url: String, events: Value) -> Subscriber {
        serde_json::from_value(json!({
            "id": id,
            "enabled": true,
            "url": url,
            "subscribed_events": events,
        }))
        .unwrap()
    }

    fn dispatcher(
        subscribers: Vec<Subscriber>,
        recorder: InMemoryOutcomeRecorder,
        config: DispatchConfig,
        clock: TestClock,
    ) -> Dispatcher {
        Dispatcher::with_enricher(
            config,
            Arc::new(InMemorySubscriberRegistry::new(subscribers)),
            Enricher::with_default_rules(Arc::new(InMemoryDomainLookup::new())),
            Arc::new(recorder),
            Arc::new(clock),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn non_matching_subscribers_are_skipped_without_records() {
        let recorder = InMemoryOutcomeRecorder::new();
        let dispatcher = dispatcher(
            vec![subscriber(1, "https://hooks.example.com".to_string(), json!({"other": true}))],
            recorder.clone(),
            DispatchConfig::new("https://lms.example.org"),
            TestClock::new(),
        );

        let report = dispatcher.dispatch(&Event::new(EVENT, Map::new())).await.unwrap();

        assert_eq!(report.considered, 1);
        assert_eq!(report.matched, 0);
        assert!(report.all_delivered());
        assert!(recorder.is_empty().await);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let recorder = InMemoryOutcomeRecorder::new();
        let clock = TestClock::new();
        let mut config = DispatchConfig::new("https://lms.example.org");
        config.retry_policy = RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::exponential(3) };

        let dispatcher = dispatcher(
            vec![subscriber(1, server.uri(), json!({EVENT: 1}))],
            recorder.clone(),
            config,
            clock.clone(),
        );

        let report = dispatcher.dispatch(&Event::new(EVENT, Map::new())).await.unwrap();

        assert_eq!(report.delivered, 1);
        let attempts: Vec<(u32, OutcomeStatus)> = recorder
            .outcomes_for(SubscriberId(1))
            .await
            .iter()
            .map(|outcome| (outcome.attempt_number, outcome.status))
            .collect();
        assert_eq!(
            attempts,
            [(1, OutcomeStatus::Rejected), (2, OutcomeStatus::Rejected), (3, OutcomeStatus::Delivered)]
        );
        assert_eq!(clock.sleeps(), [Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;

        let recorder = InMemoryOutcomeRecorder::new();
        let clock = TestClock::new();
        let mut config = DispatchConfig::new("https://lms.example.org");
        config.retry_policy = RetryPolicy::exponential(5);

        let dispatcher = dispatcher(
            vec![subscriber(1, server.uri(), json!({EVENT: "1"}))],
            recorder.clone(),
            config,
            clock.clone(),
        );

        let report = dispatcher.dispatch(&Event::new(EVENT, Map::new())).await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(recorder.len().await, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn invalid_base_url_is_rejected_up_front() {
        let result = Dispatcher::new(
            DispatchConfig::new("not a url"),
            Arc::new(InMemorySubscriberRegistry::default()),
            Arc::new(InMemoryDomainLookup::new()),
            Arc::new(InMemoryOutcomeRecorder::new()),
        );
        assert!(matches!(result, Err(DeliveryError::ConfigurationError { .. })));
    }

    #[test]
    fn report_counts_add_up() {
        let mut report = DispatchReport::new(EVENT, 4, 3);
        report.count(OutcomeStatus::Delivered);
        report.count(OutcomeStatus::Rejected);
        report.count(OutcomeStatus::Failed);

        assert_eq!(report.delivered + report.rejected + report.failed, report.matched);
        assert!(!report.all_delivered());
    }
}
