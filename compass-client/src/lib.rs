//! Compass Client - resilient data access for the career dashboard
//!
//! Every external fetch (GitHub profile/repos/activity, skill-gap and
//! roadmap analysis, advice content) goes through [`CompassClient::execute`],
//! which composes parameter validation, a session-scoped cache, per-operation
//! circuit breaking, in-flight coalescing, bounded retries with exponential
//! backoff, response sanitization, and an ownership check into one pipeline
//! that degrades predictably instead of crashing the caller.
//!
//! ```ignore
//! let client = CompassClient::new(transport, kv, CompassConfig::default_dashboard())?;
//! client.sessions().initialize(&access_token, &refresh_token).await?;
//! let profile = client
//!     .execute("github.profile", &json!({"username": "octocat"}))
//!     .await?;
//! ```

pub mod circuit;
pub mod client;
pub mod retry;
pub mod session_manager;
pub mod transport;

pub use circuit::{CircuitBreaker, CircuitState};
pub use client::{CompassClient, Fetched};
pub use session_manager::SessionManager;
pub use transport::{Transport, TransportResponse};

// Re-export the configuration and error types callers need to construct
// and drive a client without importing compass-core directly.
pub use compass_core::{
    AuthError, CircuitError, CompassConfig, CompassError, CompassResult, OperationConfig,
    OperationTable, OwnershipError, RetryPolicy, TransportError, ValidationError,
};
pub use compass_store::{InMemoryKeyValueStore, KeyValueStore};
