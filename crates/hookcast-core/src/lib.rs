//! Core domain models and collaborator contracts.
//!
//! Provides the event, subscriber and outcome types the dispatch engine works
//! with, the traits for the registry, domain lookup and outcome store it
//! depends on, plus in-memory and PostgreSQL implementations of those traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod error;
pub mod memory;
pub mod models;
pub mod storage;
pub mod time;

pub use collaborators::{
    DomainLookup, MulticastOutcomeRecorder, OutcomeRecorder, SubscriberRegistry,
    TracingOutcomeRecorder,
};
pub use error::{CoreError, Result};
pub use models::{
    DeliveryOutcome, DomainRecord, EntityKind, Event, OutcomeStatus, Subscriber, SubscriberId,
};
pub use time::{Clock, RealClock, TestClock};
