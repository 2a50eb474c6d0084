//! Error types for webhook dispatch.
//!
//! Three layers fail differently. `DispatchError` is the only error that
//! escapes `Dispatcher::dispatch` and means the subscriber list could not be
//! loaded. `EnrichmentError` and `DeliveryError` are per-subscriber: they are
//! logged and turned into failed outcomes, never propagated to the caller.

use std::{fmt, time::Duration};

use hookcast_core::{CoreError, EntityKind};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures of a single HTTP delivery attempt or of client setup.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Milliseconds before the request timed out
        timeout_ms: u64,
    },

    /// Subscriber or client configuration cannot produce a valid request.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Payload could not be encoded.
    #[error("payload serialization failed: {message}")]
    SerializationError {
        /// Serializer error message
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Determines if this error represents a temporary failure.
    ///
    /// Only network errors and timeouts are worth another attempt; a request
    /// that could not be built will not build on the next attempt either.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => true,
            Self::ConfigurationError { .. }
            | Self::SerializationError { .. }
            | Self::InternalError { .. } => false,
        }
    }
}

/// Category of delivery error for logs and outcome records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// Invalid subscriber or client configuration.
    Configuration,
    /// Payload encoding problems.
    Serialization,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::SerializationError { .. } => Self::Serialization,
            DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Configuration => write!(f, "configuration"),
            Self::Serialization => write!(f, "serialization"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Failures while building `extra_event_data` for an event.
#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    /// The event does not carry an id the rule needs.
    #[error("event {event_name} has no usable `{field}`")]
    MissingField {
        /// Event being enriched
        event_name: String,
        /// Dotted path of the missing field
        field: &'static str,
    },

    /// A referenced record could not be fetched.
    #[error("{entity} {id} lookup failed: {source}")]
    Lookup {
        /// Kind of record requested
        entity: EntityKind,
        /// Id of the record requested
        id: i64,
        /// Underlying collaborator error
        #[source]
        source: CoreError,
    },
}

/// Failures that abort a whole dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The subscriber registry could not be read.
    #[error("failed to load subscribers: {0}")]
    Registry(#[source] CoreError),
}
