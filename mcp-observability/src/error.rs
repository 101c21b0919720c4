//! Error types for observability operations
//!
//! These errors only ever describe failures of the observability layer itself.
//! Errors raised by an observed tool are returned to its caller untouched and
//! never pass through this type.

use thiserror::Error;
use uuid::Uuid;

/// Result type for observability operations
pub type ObservabilityResult<T> = Result<T, ObservabilityError>;

/// Errors that can occur while configuring the observer or delivering traces
#[derive(Error, Debug)]
pub enum ObservabilityError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration
        message: String,
    },

    /// Tool names must be non-empty identifiers
    #[error("Invalid tool name '{name}': {reason}")]
    InvalidToolName {
        /// Rejected tool name
        name: String,
        /// Why the name was rejected
        reason: String,
    },

    /// Network/HTTP transport error while talking to the collector
    #[error("Network error: {source}")]
    Network {
        /// Underlying HTTP client error
        #[from]
        source: reqwest::Error,
    },

    /// Collector answered with a non-2xx status
    #[error("Collector returned {status}: {body}")]
    CollectorRejected {
        /// HTTP status code
        status: u16,
        /// Response body, as returned
        body: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Underlying serde_json error
        #[from]
        source: serde_json::Error,
    },

    /// I/O error (configuration files)
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Trace queue is at capacity and the event was dropped
    #[error("Trace queue full, dropped trace {trace_id}")]
    QueueFull {
        /// Id of the dropped trace
        trace_id: Uuid,
    },

    /// Dispatcher has been shut down
    #[error("Trace dispatcher is shut down")]
    DispatcherClosed,

    /// No async runtime to host the background dispatcher
    #[error("Runtime error: {message}")]
    Runtime {
        /// Description of the runtime problem
        message: String,
    },
}

impl ObservabilityError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new invalid tool name error
    pub fn invalid_tool_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidToolName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Whether a trace submission that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            Self::CollectorRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
