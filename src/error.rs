//! Error types for the Datadog provider.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, schema validation, the Datadog API, cassette replay,
//! state management, planning and apply.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Datadog provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema validation errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Datadog API errors.
    #[error("Datadog API error: {0}")]
    Api(#[from] ApiError),

    /// Cassette record/replay errors.
    #[error("Cassette error: {0}")]
    Cassette(#[from] CassetteError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The workspace file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The workspace file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// API or application key missing while key validation is enabled.
    #[error("api_key and app_key must be set unless validate = false")]
    MissingCredentials,

    /// The API rejected the configured keys.
    #[error("Invalid or missing credentials provided to the Datadog Provider: {message}")]
    InvalidCredentials {
        /// Reason returned by the validation endpoint.
        message: String,
    },

    /// Two blocks share the same address.
    #[error("Duplicate {block_kind} address: {address}")]
    DuplicateAddress {
        /// Kind of block (resource, data source).
        block_kind: String,
        /// The duplicated address.
        address: String,
    },

    /// No resource or data source is registered under this type name.
    #[error("Unknown {block_kind} type: {type_name}")]
    UnknownType {
        /// Kind of block (resource, data source).
        block_kind: String,
        /// The unknown type name.
        type_name: String,
    },

    /// Circular dependency detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Errors raised when a value does not fit its attribute schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A value failed a validator or type check.
    #[error("{path}: {message}")]
    InvalidValue {
        /// Dotted attribute path (`recurrence.0.type`).
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// A required attribute is absent.
    #[error("{path}: required attribute is not set")]
    MissingRequired {
        /// Dotted attribute path.
        path: String,
    },

    /// Two mutually exclusive attributes are both set.
    #[error("{path}: conflicts with {other}")]
    Conflict {
        /// Dotted attribute path.
        path: String,
        /// The conflicting attribute.
        other: String,
    },

    /// The attribute is not part of the schema.
    #[error("{path}: unsupported attribute")]
    UnknownAttribute {
        /// Dotted attribute path.
        path: String,
    },
}

/// Datadog API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The object does not exist (HTTP 404).
    #[error("404 Not Found: {path}")]
    NotFound {
        /// Request path that returned 404.
        path: String,
    },

    /// API request failed.
    #[error("{status} {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error messages from the API.
        message: String,
    },

    /// Rate limited.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error communicating with Datadog: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("invalid response from Datadog: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The request kept failing until the retry timeout elapsed.
    #[error("timeout after {elapsed_secs}s waiting for {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Seconds spent before giving up.
        elapsed_secs: u64,
    },

    /// An error wrapped with the name of the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What the provider was doing (`error creating monitor`).
        context: String,
        /// The underlying API error.
        #[source]
        source: Box<ApiError>,
    },
}

/// Cassette record/replay errors.
#[derive(Debug, Error)]
pub enum CassetteError {
    /// Replay requested but no cassette exists.
    #[error("cassette not found: {path}")]
    Missing {
        /// Expected cassette path.
        path: PathBuf,
    },

    /// No unused recorded interaction matches the request.
    #[error("requested interaction not found: {method} {url}")]
    NoMatch {
        /// HTTP method of the request.
        method: String,
        /// Redacted request URL.
        url: String,
    },

    /// The cassette file is malformed.
    #[error("invalid cassette {path}: {message}")]
    Format {
        /// Cassette path.
        path: PathBuf,
        /// Parse failure.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// The address is not tracked in state.
    #[error("No resource {address} in state")]
    ResourceNotInState {
        /// Resource address.
        address: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan is empty (nothing to do).
    #[error("Plan is empty: no changes required")]
    EmptyPlan,

    /// Dependency resolution failed.
    #[error("Failed to resolve dependencies: {message}")]
    DependencyResolutionFailed {
        /// Description of the dependency issue.
        message: String,
    },

    /// A `${...}` reference points at nothing known.
    #[error("Unresolved reference {reference} in {address}")]
    UnresolvedReference {
        /// Address of the block holding the reference.
        address: String,
        /// The reference text.
        reference: String,
    },
}

/// Errors raised while applying a plan.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A resource operation failed.
    #[error("Failed to {operation} {address}: {reason}")]
    ResourceFailed {
        /// Resource address.
        address: String,
        /// Operation (create, read, update, delete, import).
        operation: String,
        /// Reason for failure.
        reason: String,
    },

    /// A destroyed object is still reported by the API.
    #[error("{resource} {id} still exists")]
    StillExists {
        /// Resource type name.
        resource: String,
        /// Object id.
        id: String,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
    },

    /// Apply was aborted.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error is an HTTP 404 from the API.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api(api) => api.is_not_found(),
            _ => false,
        }
    }

    /// Returns the HTTP status carried by an API error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(api) => api.status(),
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(api) => api.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Api(ApiError::NetworkError { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Prefixes an API error with the operation that produced it.
    ///
    /// Non-API errors are returned unchanged.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Api(api) => Self::Api(ApiError::Context {
                context: context.into(),
                source: Box::new(api),
            }),
            other => other,
        }
    }
}

/// Labels an API error with the CRUD step that produced it.
///
/// Mirrors the `error creating monitor: 400 Bad Request` style used in
/// every resource.
#[must_use]
pub fn translate_client_error(err: ProviderError, context: &str) -> ProviderError {
    err.context(context)
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl SchemaError {
    /// Creates an invalid value error at a path.
    #[must_use]
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns true for HTTP 404, looking through context wrappers.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// HTTP status associated with the error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::ApiRequestFailed { status, .. } => Some(*status),
            Self::Context { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns true for errors worth retrying (429, 5xx, network).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            Self::Context { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
