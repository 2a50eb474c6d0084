//! Webhook dispatch engine.
//!
//! Given one event raised by the host, the [`Dispatcher`] loads the current
//! subscribers, keeps the ones that subscribed to the event, enriches the
//! payload with looked-up context, POSTs it to each subscriber and records one
//! outcome per attempt.
//!
//! # Architecture
//!
//! ```text
//! Event ──▶ Dispatcher ──▶ matcher ──▶ Enricher ──▶ PayloadBuilder ──▶ DeliveryClient
//!               │                         │                                │
//!               ▼                         ▼                                ▼
//!      SubscriberRegistry           DomainLookup                    OutcomeRecorder
//! ```
//!
//! Collaborators come from `hookcast_core` and are injected as trait objects.
//! Deliveries for one event run concurrently up to a configured limit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookcast_core::{
//!     memory::{InMemoryDomainLookup, InMemorySubscriberRegistry},
//!     Event, TracingOutcomeRecorder,
//! };
//! use hookcast_delivery::{DispatchConfig, Dispatcher};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = Dispatcher::new(
//!     DispatchConfig::new("https://lms.example.org"),
//!     Arc::new(InMemorySubscriberRegistry::default()),
//!     Arc::new(InMemoryDomainLookup::new()),
//!     Arc::new(TracingOutcomeRecorder),
//! )?;
//!
//! let event: Event = serde_json::from_str(r#"{"eventname": "\\core\\event\\course_viewed"}"#)?;
//! let report = dispatcher.dispatch(&event).await?;
//! assert_eq!(report.matched, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod enrich;
pub mod error;
pub mod matcher;
pub mod payload;
pub mod retry;

pub use client::{ClientConfig, DeliveryClient};
pub use dispatcher::{DispatchConfig, DispatchReport, Dispatcher};
pub use enrich::{Enricher, EnrichmentRule, ExtraEventData, QuizAttemptSubmitted};
pub use error::{DeliveryError, DispatchError, EnrichmentError, Result};
pub use payload::{OutboundPayload, PayloadBuilder};
pub use retry::{BackoffStrategy, RetryPolicy};

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default number of deliveries in flight per event.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 16;
