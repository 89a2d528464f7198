//! Error types for Compass operations
//!
//! Every failure a caller can observe is a typed variant here; the client
//! never surfaces a raw string or an unclassified panic. Retryability is a
//! pure function of the transport error variant, never of message text.

use thiserror::Error;

/// Session and token errors. All of these are fatal to the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no active session")]
    MissingSession,

    #[error("malformed session token: {reason}")]
    MalformedToken { reason: String },

    #[error("unknown token provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("session token expired: issued {age_ms}ms ago, max age {max_age_ms}ms")]
    TokenExpired { age_ms: i64, max_age_ms: i64 },

    #[error("session token payload too short: {decoded_len} bytes decoded")]
    PayloadTooShort { decoded_len: usize },

    #[error("session token mirror mismatch, possible tampering")]
    TamperDetected,
}

/// Schema validation errors, raised on outbound params and inbound
/// responses alike.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("invalid type for {field}: expected {expected}, got {got}")]
    InvalidType {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("value for {field} does not match required pattern")]
    PatternMismatch { field: String },

    #[error("value for {field} is not in the allowed set")]
    NotAllowed { field: String },

    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },
}

/// Ownership verification errors. Security-critical: a payload that fails
/// this check is never cached and never returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("response owner {found} does not match session user {expected} on {operation}")]
    Mismatch {
        operation: String,
        expected: String,
        found: String,
    },
}

/// Transport call failures, tagged by kind.
///
/// The variant alone decides retryability (see [`TransportError::is_retryable`]);
/// human-readable messages are for logs only and are never inspected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network failure: {reason}")]
    Network { reason: String },

    #[error("call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: i64 },

    #[error("rate limited by upstream")]
    RateLimited { retry_after_ms: Option<i64> },

    #[error("upstream server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("upstream rejected the request ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("upstream authentication failed: {message}")]
    Auth { message: String },

    #[error("call cancelled by caller")]
    Cancelled,
}

impl TransportError {
    /// Whether the retry executor may re-attempt after this failure.
    ///
    /// Retryable: transient network failures, timeouts, rate limiting,
    /// and 5xx-class server errors. Everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network { .. }
                | TransportError::Timeout { .. }
                | TransportError::RateLimited { .. }
                | TransportError::Server { .. }
        )
    }

    /// Short stable label for log fields and metrics-style counters.
    pub fn kind_label(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Timeout { .. } => "timeout",
            TransportError::RateLimited { .. } => "rate_limited",
            TransportError::Server { .. } => "server",
            TransportError::Client { .. } => "client",
            TransportError::Auth { .. } => "auth",
            TransportError::Cancelled => "cancelled",
        }
    }
}

/// Circuit breaker fast-fail errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitError {
    #[error("circuit open for {operation}, next trial in {retry_after_ms}ms")]
    Open {
        operation: String,
        retry_after_ms: i64,
    },
}

/// Key-value store errors (the session-token mirror backend).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key-value store failure on {key}: {reason}")]
    Backend { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no configuration registered for operation {operation}")]
    MissingOperation { operation: String },

    #[error("invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Compass failures.
#[derive(Debug, Clone, Error)]
pub enum CompassError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("ownership error: {0}")]
    Ownership(#[from] OwnershipError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("circuit error: {0}")]
    Circuit(#[from] CircuitError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Compass operations.
pub type CompassResult<T> = Result<T, CompassError>;

// =============================================================================
// TESTS
// =============================================================================
