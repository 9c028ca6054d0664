//! Error types for the Airtable integration.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for Airtable operations.
pub type AirtableResult<T> = Result<T, AirtableError>;

/// Top-level error type for the Airtable integration.
#[derive(Debug, Error)]
pub enum AirtableError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Malformed input, rejected before or by the API.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Authentication or authorization error (401/403).
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Resource not found (404).
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// Remote rate limit rejection (429).
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Server error (5xx).
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Connection or timeout error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response could not be decoded.
    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    /// Caller-initiated cancellation or operation timeout.
    #[error("Cancelled: {0}")]
    Cancelled(#[from] CancelledError),

    /// Terminal failure of a whole operation, tagged with the stage that failed.
    #[error("{stage} failed: {source}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Underlying cause.
        #[source]
        source: Box<AirtableError>,
    },
}

/// Orchestration stage reported with top-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a rate limiter slot.
    Admission,
    /// Splitting or validating a batch operation.
    Batching,
    /// Fetching a page of a list operation.
    Pagination,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Admission => write!(f, "admission"),
            Stage::Batching => write!(f, "batching"),
            Stage::Pagination => write!(f, "pagination"),
        }
    }
}

/// Flat classification of an [`AirtableError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`AirtableError::Configuration`].
    Configuration,
    /// See [`AirtableError::Validation`].
    Validation,
    /// See [`AirtableError::Authentication`].
    Authentication,
    /// See [`AirtableError::NotFound`].
    NotFound,
    /// See [`AirtableError::RateLimit`].
    RateLimitExceeded,
    /// See [`AirtableError::Server`].
    Server,
    /// See [`AirtableError::Transport`].
    Transport,
    /// See [`AirtableError::Response`].
    Response,
    /// See [`AirtableError::Cancelled`].
    Cancelled,
}

impl AirtableError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        AirtableError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
    }

    /// Creates a validation error for a bad parameter.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        AirtableError::Validation(ValidationError::InvalidParameter(msg.into()))
    }

    /// Creates a not found error for a record.
    pub fn record_not_found(record_id: impl Into<String>) -> Self {
        AirtableError::NotFound(NotFoundError::Record(record_id.into()))
    }

    /// Creates a rate limit error.
    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        AirtableError::RateLimit(RateLimitError::TooManyRequests {
            message: msg.into(),
            retry_after,
        })
    }

    /// Creates a server error.
    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        AirtableError::Server(ServerError::Status {
            status,
            message: msg.into(),
            retry_after: None,
        })
    }

    /// Creates a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        AirtableError::Transport(TransportError::Timeout(msg.into()))
    }

    /// Creates a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        AirtableError::Response(ResponseError::DeserializationError(msg.into()))
    }

    /// Wraps this error as the terminal failure of `stage`.
    ///
    /// An error already tagged with a stage keeps its original tag.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            AirtableError::Stage { .. } => self,
            other => AirtableError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage tag, if this is a top-level operation failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AirtableError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns the error with any stage tag removed.
    pub fn root(&self) -> &AirtableError {
        match self {
            AirtableError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the flat error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AirtableError::Configuration(_) => ErrorKind::Configuration,
            AirtableError::Validation(_) => ErrorKind::Validation,
            AirtableError::Authentication(_) => ErrorKind::Authentication,
            AirtableError::NotFound(_) => ErrorKind::NotFound,
            AirtableError::RateLimit(_) => ErrorKind::RateLimitExceeded,
            AirtableError::Server(_) => ErrorKind::Server,
            AirtableError::Transport(_) => ErrorKind::Transport,
            AirtableError::Response(_) => ErrorKind::Response,
            AirtableError::Cancelled(_) => ErrorKind::Cancelled,
            AirtableError::Stage { source, .. } => source.kind(),
        }
    }

    /// Returns true if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            AirtableError::RateLimit(_)
                | AirtableError::Server(_)
                | AirtableError::Transport(TransportError::Network(_))
                | AirtableError::Transport(TransportError::Timeout(_))
        )
    }

    /// Returns the retry delay hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            AirtableError::RateLimit(RateLimitError::TooManyRequests { retry_after, .. }) => {
                *retry_after
            }
            AirtableError::Server(ServerError::Status { retry_after, .. }) => *retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status code if applicable.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self.root() {
            AirtableError::Validation(ValidationError::Rejected { status, .. })
            | AirtableError::Server(ServerError::Status { status, .. })
            | AirtableError::Response(ResponseError::UnexpectedStatus { status, .. }) => {
                StatusCode::from_u16(*status).ok()
            }
            AirtableError::Authentication(AuthenticationError::InvalidToken(_)) => {
                Some(StatusCode::UNAUTHORIZED)
            }
            AirtableError::Authentication(AuthenticationError::Forbidden { .. }) => {
                Some(StatusCode::FORBIDDEN)
            }
            AirtableError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            AirtableError::RateLimit(_) => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing credentials.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Invalid record id.
    #[error("Invalid record id: {0:?}")]
    InvalidRecordId(String),

    /// Invalid parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Request rejected by the API (400, 413, 422).
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Airtable error type, e.g. `INVALID_REQUEST_UNKNOWN`.
        error_type: Option<String>,
        /// Error message.
        message: String,
    },
}

/// Authentication and authorization errors.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Missing or unusable token.
    #[error("Missing token: {0}")]
    MissingToken(String),

    /// Invalid token (401).
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Forbidden (403).
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Airtable error type, e.g. `INVALID_PERMISSIONS_OR_MODEL_NOT_FOUND`.
        error_type: Option<String>,
        /// Error message.
        message: String,
    },
}

/// Not found errors.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Base, table, record or route not found, as reported by the API.
    #[error("Resource not found: {message}")]
    Resource {
        /// Airtable error type, e.g. `TABLE_NOT_FOUND`.
        error_type: Option<String>,
        /// Error message.
        message: String,
    },

    /// Record not found.
    #[error("Record not found: {0}")]
    Record(String),
}

impl NotFoundError {
    /// Returns true if the missing resource is a record rather than its
    /// table, base or route.
    ///
    /// Record lookups answer with a bare `NOT_FOUND` code; table and base
    /// lookups name what is missing (`TABLE_NOT_FOUND`, `MODEL_ID_NOT_FOUND`).
    pub fn is_record(&self) -> bool {
        match self {
            NotFoundError::Record(_) => true,
            NotFoundError::Resource { error_type, .. } => match error_type.as_deref() {
                None | Some("NOT_FOUND") => true,
                Some(other) => other.contains("RECORD"),
            },
        }
    }
}

/// Rate limit errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Too many requests (429).
    #[error("Too many requests: {message}")]
    TooManyRequests {
        /// Error message.
        message: String,
        /// Retry after duration.
        retry_after: Option<Duration>,
    },
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// 5xx response.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Retry after duration.
        retry_after: Option<Duration>,
    },
}

/// Response errors.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Unexpected format.
    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),

    /// Status code outside the known taxonomy.
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

/// Cancellation errors.
#[derive(Debug, Error)]
pub enum CancelledError {
    /// The caller's cancellation token fired.
    #[error("operation cancelled by caller")]
    Token,

    /// The operation's own timeout elapsed.
    #[error("operation timed out after {0:?}")]
    OperationTimeout(Duration),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed, reset or interrupted.
    #[error("Network error: {0}")]
    Network(String),

    /// Exchange deadline exceeded.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Request could not be built or sent.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}
