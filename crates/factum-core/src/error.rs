//! Structured error handling for the fact-indexing and counter engine.
//!
//! Every fallible operation in this crate returns [`FactumResult`]. Variants
//! carry enough structured context (which config, which fact, which counter)
//! for a caller to log or retry without re-parsing a message string.

use std::fmt;
use thiserror::Error;

/// Error type covering every failure mode of the engine.
#[derive(Error, Debug, Clone)]
pub enum FactumError {
    /// An `IndexConfig` or `CounterDefinition` failed validation at load time.
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Human-readable description of what failed validation.
        message: String,
        /// Name of the offending config entry, if any.
        entry: Option<String>,
    },

    /// The incoming message could not be parsed into a well-formed shape.
    #[error("invalid message: {message}")]
    InvalidMessage {
        /// Human-readable description of the parse failure.
        message: String,
    },

    /// A fact was structurally well-formed JSON but violated the fact
    /// contract (missing or non-positive `t`, missing `id`, etc).
    #[error("invalid fact{}: {message}", fact_id.as_deref().map(|id| format!(" {id}")).unwrap_or_default())]
    InvalidFact {
        /// Human-readable description of the violation.
        message: String,
        /// The fact's `id`, when it could be recovered.
        fact_id: Option<String>,
    },

    /// A condition tree referenced an unsupported operator or shape.
    #[error("invalid predicate: {message}")]
    InvalidPredicate {
        /// Human-readable description of the malformed predicate.
        message: String,
        /// The field the predicate was attached to, if known.
        field: Option<String>,
    },

    /// The underlying `FactStore` could not serve the request at all (as
    /// opposed to timing out).
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Human-readable description of the unavailability.
        message: String,
    },

    /// A worker slot could not be acquired from the `CounterExecutor`'s pool
    /// before `workerAcquireTimeoutMs` elapsed.
    #[error("timed out waiting for a worker slot after {timeout_ms}ms")]
    WorkerTimeout {
        /// The configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A single counter query did not complete before `queryTimeoutMs`
    /// elapsed.
    #[error("counter query '{counter_name}' timed out after {timeout_ms}ms")]
    QueryTimeout {
        /// The counter (or counter group) whose query timed out.
        counter_name: String,
        /// The configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A bulk store write (facts + index entries) partially failed.
    #[error("store bulk write partially failed: {succeeded}/{attempted} succeeded")]
    StoreBulkPartial {
        /// Number of rows successfully written.
        succeeded: usize,
        /// Total number of rows attempted.
        attempted: usize,
        /// Description of the first failure encountered.
        message: String,
    },
}

impl FactumError {
    /// Stable category label, suitable for a `tracing` field or a metric tag.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config_invalid",
            Self::InvalidMessage { .. } => "invalid_message",
            Self::InvalidFact { .. } => "invalid_fact",
            Self::InvalidPredicate { .. } => "invalid_predicate",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::WorkerTimeout { .. } => "worker_timeout",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::StoreBulkPartial { .. } => "store_bulk_partial",
        }
    }

    /// Severity, used by callers deciding whether to page or just log.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConfigInvalid { .. } => ErrorSeverity::Critical,
            Self::InvalidMessage { .. } | Self::InvalidFact { .. } => ErrorSeverity::Low,
            Self::InvalidPredicate { .. } => ErrorSeverity::Medium,
            Self::StoreUnavailable { .. } => ErrorSeverity::High,
            Self::WorkerTimeout { .. } | Self::QueryTimeout { .. } => ErrorSeverity::Medium,
            Self::StoreBulkPartial { .. } => ErrorSeverity::High,
        }
    }

    /// Whether a caller can reasonably retry the same request unchanged.
    ///
    /// Timeouts and store unavailability are retryable; malformed input and
    /// bad config are not, since retrying without changing anything will
    /// fail the same way.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::WorkerTimeout { .. }
                | Self::QueryTimeout { .. }
                | Self::StoreBulkPartial { .. }
        )
    }
}

/// Error severity levels for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// Expected, routine — e.g. a caller sent a malformed message.
    Low,
    /// Worth investigating but not urgent.
    Medium,
    /// Degrades correctness or availability; should be paged.
    High,
    /// Engine cannot continue operating correctly.
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result alias used throughout the engine.
pub type FactumResult<T> = Result<T, FactumError>;

impl FactumError {
    /// Build a [`Self::ConfigInvalid`].
    pub fn config_invalid(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid { message: message.into(), entry: Some(entry.into()) }
    }

    /// Build a [`Self::InvalidMessage`].
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage { message: message.into() }
    }

    /// Build a [`Self::InvalidFact`] with a known fact id.
    pub fn invalid_fact(fact_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFact { message: message.into(), fact_id: Some(fact_id.into()) }
    }

    /// Build a [`Self::InvalidFact`] for a fact whose id could not be read.
    pub fn invalid_fact_no_id(message: impl Into<String>) -> Self {
        Self::InvalidFact { message: message.into(), fact_id: None }
    }

    /// Build a [`Self::InvalidPredicate`].
    pub fn invalid_predicate(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPredicate { message: message.into(), field: Some(field.into()) }
    }

    /// Build a [`Self::StoreUnavailable`].
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }
}

impl From<serde_json::Error> for FactumError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMessage { message: format!("json error: {err}") }
    }
}

impl From<std::io::Error> for FactumError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable { message: format!("io error: {err}") }
    }
}
