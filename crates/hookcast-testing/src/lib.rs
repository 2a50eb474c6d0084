//! Test infrastructure for the dispatch engine.
//!
//! Provides a wiremock-backed subscriber endpoint, fixture builders and a
//! [`TestEnv`] bundling in-memory collaborators with a deterministic clock.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use hookcast_core::{
    memory::{InMemoryDomainLookup, InMemoryOutcomeRecorder, InMemorySubscriberRegistry},
    CoreError, DomainLookup, OutcomeRecorder, Subscriber, SubscriberRegistry,
};

pub mod fixtures;
pub mod http;

pub use fixtures::{EventBuilder, SubscriberBuilder};
pub use hookcast_core::TestClock;
pub use http::{MockEndpoint, MockResponse, MockServer, RecordedRequest};

/// In-memory collaborators plus a mock subscriber endpoint.
///
/// Handles are shared with whatever the test wires them into, so outcomes and
/// received requests can be inspected after a dispatch.
pub struct TestEnv {
    /// HTTP mock server playing the subscriber side
    pub http_mock: MockServer,
    /// Deterministic clock for retry delays and timestamps
    pub clock: TestClock,
    /// Subscriber registry
    pub registry: InMemorySubscriberRegistry,
    /// Domain lookup, seeded with the quiz fixture records
    pub lookup: InMemoryDomainLookup,
    /// Outcome recorder
    pub recorder: InMemoryOutcomeRecorder,
}

impl TestEnv {
    /// Creates an environment with no subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the fixture records cannot be seeded.
    pub async fn new() -> Result<Self, CoreError> {
        Ok(Self {
            http_mock: MockServer::start().await,
            clock: TestClock::new(),
            registry: InMemorySubscriberRegistry::default(),
            lookup: fixtures::seeded_quiz_lookup().await?,
            recorder: InMemoryOutcomeRecorder::new(),
        })
    }

    /// Adds a subscriber to the registry.
    pub async fn add_subscriber(&self, subscriber: Subscriber) {
        self.registry.upsert(subscriber).await;
    }

    /// Registry handle as a trait object.
    pub fn registry(&self) -> Arc<dyn SubscriberRegistry> {
        Arc::new(self.registry.clone())
    }

    /// Lookup handle as a trait object.
    pub fn lookup(&self) -> Arc<dyn DomainLookup> {
        Arc::new(self.lookup.clone())
    }

    /// Recorder handle as a trait object.
    pub fn recorder(&self) -> Arc<dyn OutcomeRecorder> {
        Arc::new(self.recorder.clone())
    }

    /// Clock handle as a trait object.
    pub fn clock(&self) -> Arc<dyn hookcast_core::Clock> {
        Arc::new(self.clock.clone())
    }
}
