//! Compass Core - shared types for the Compass data-access layer
//!
//! This crate holds everything the resilient client is built from but that
//! performs no I/O of its own: identity and time primitives, the error
//! taxonomy, the per-operation configuration table, the session model and
//! token grammar, and the validation/sanitization engine.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod sanitize;
pub mod schema;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CachePolicy, CircuitPolicy, CompassConfig, OperationConfig, OperationTable, RetryPolicy,
    SessionPolicy,
};
pub use error::{
    AuthError, CircuitError, CompassError, CompassResult, ConfigError, OwnershipError,
    StoreError, TransportError, ValidationError,
};
pub use identity::{
    compute_content_hash, hash_to_hex, new_trace_id, ContentHash, DurationMs, EpochMs,
    OperationId, UserId, ANONYMOUS_SCOPE,
};
pub use sanitize::{is_clean, sanitize_string};
pub use schema::{CustomRule, FieldRule, FieldType, Schema, ValidationReport};
pub use session::{mirror, ParsedToken, Session};
