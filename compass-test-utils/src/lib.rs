//! Compass Test Utilities
//!
//! Centralized test infrastructure for the Compass workspace:
//! - A scriptable mock transport that records every call
//! - Session-token builders matching the production grammar
//! - Proptest generators for tokens and parameter maps
//! - Re-exported clocks and stores for fixture wiring

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use compass_client::{Transport, TransportError, TransportResponse};
use compass_core::EpochMs;

// Re-export the pieces every test fixture wires together.
pub use compass_client::{CompassClient, CompassConfig, Fetched};
pub use compass_core::{ManualClock, SessionPolicy};
pub use compass_store::{InMemoryKeyValueStore, ScopedCacheKey};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One observed transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: String,
    pub params: Value,
    pub revalidation_tag: Option<String>,
}

/// Scriptable mock transport.
///
/// Outcomes are queued per operation and consumed in order; once a queue
/// is empty the operation's sticky response (if any) answers every further
/// call. Every call is recorded for assertion, and an optional artificial
/// latency keeps concurrent calls overlapping long enough for dedup tests.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<TransportResponse, TransportError>>>>,
    sticky: Mutex<HashMap<String, Result<TransportResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Queue one outcome for an operation (consumed in FIFO order).
    pub fn enqueue(
        &self,
        operation: &str,
        outcome: Result<TransportResponse, TransportError>,
    ) -> &Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued
                .entry(operation.to_string())
                .or_default()
                .push_back(outcome);
        }
        self
    }

    /// Queue a plain payload success.
    pub fn enqueue_ok(&self, operation: &str, data: Value) -> &Self {
        self.enqueue(operation, Ok(TransportResponse::payload(data)))
    }

    /// Queue a failure.
    pub fn enqueue_err(&self, operation: &str, error: TransportError) -> &Self {
        self.enqueue(operation, Err(error))
    }

    /// Sticky response once the queue for an operation is drained.
    pub fn respond(&self, operation: &str, outcome: Result<TransportResponse, TransportError>) {
        if let Ok(mut sticky) = self.sticky.lock() {
            sticky.insert(operation.to_string(), outcome);
        }
    }

    /// Sticky plain payload success.
    pub fn respond_ok(&self, operation: &str, data: Value) {
        self.respond(operation, Ok(TransportResponse::payload(data)));
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Total number of calls across all operations.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of calls for one operation.
    pub fn calls_for(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.operation == operation).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(
        &self,
        operation: &str,
        params: &Value,
        revalidation_tag: Option<&str>,
    ) -> Result<TransportResponse, TransportError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                operation: operation.to_string(),
                params: params.clone(),
                revalidation_tag: revalidation_tag.map(str::to_string),
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(operation).and_then(VecDeque::pop_front));
        if let Some(outcome) = queued {
            return outcome;
        }

        let sticky = self
            .sticky
            .lock()
            .ok()
            .and_then(|s| s.get(operation).cloned());
        if let Some(outcome) = sticky {
            return outcome;
        }

        Err(TransportError::Network {
            reason: format!("no scripted response for {}", operation),
        })
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("call_count", &self.call_count())
            .finish()
    }
}

// ============================================================================
// TOKEN BUILDERS
// ============================================================================

/// Build an access token in the production grammar
/// (`<provider>_<userId>_<timestampMs>_<base64Payload>`).
pub fn make_access_token(
    provider: &str,
    user_id: &str,
    issued_at_ms: EpochMs,
    payload: &[u8],
) -> String {
    format!(
        "{}_{}_{}_{}",
        provider,
        user_id,
        issued_at_ms,
        STANDARD.encode(payload)
    )
}

/// A GitHub token whose payload carries the given username.
pub fn make_github_token(user_id: &str, username: &str, issued_at_ms: EpochMs) -> String {
    let payload = format!(r#"{{"username":"{}","provider_token":"gho_test"}}"#, username);
    make_access_token("github", user_id, issued_at_ms, payload.as_bytes())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Proptest strategies for fuzzing the token grammar and parameter maps.
pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Well-formed access tokens issued near the given instant.
    pub fn valid_token_strategy(now_ms: EpochMs) -> impl Strategy<Value = String> {
        (
            "[a-zA-Z0-9]{1,12}",
            0i64..86_000_000i64,
            proptest::collection::vec(any::<u8>(), 8..64),
        )
            .prop_map(move |(user_id, age_ms, payload)| {
                make_access_token("github", &user_id, now_ms - age_ms, &payload)
            })
    }

    /// Arbitrary flat parameter objects.
    pub fn params_strategy() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 0..5).prop_map(
            |map| {
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                )
            },
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_transport_queue_then_sticky() {
        let transport = MockTransport::new();
        transport.enqueue_err(
            "github.profile",
            TransportError::Network {
                reason: "flaky".to_string(),
            },
        );
        transport.respond_ok("github.profile", json!({"id": 1}));

        let first = transport.call("github.profile", &json!({}), None).await;
        assert!(first.is_err());

        let second = transport.call("github.profile", &json!({}), None).await;
        assert_eq!(second.unwrap(), TransportResponse::payload(json!({"id": 1})));

        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls_for("github.profile"), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_records_tags() {
        let transport = MockTransport::new();
        transport.respond(
            "github.profile",
            Ok(TransportResponse::NotModified),
        );

        let result = transport
            .call("github.profile", &json!({}), Some("etag-1"))
            .await;
        assert_eq!(result.unwrap(), TransportResponse::NotModified);
        assert_eq!(
            transport.calls()[0].revalidation_tag,
            Some("etag-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_unscripted_operation_fails_as_network_error() {
        let transport = MockTransport::new();
        let result = transport.call("unknown.op", &json!({}), None).await;
        assert!(matches!(result, Err(TransportError::Network { .. })));
    }

    #[test]
    fn test_token_builder_matches_grammar() {
        let token = make_github_token("111", "octocat", 1_700_000_000_000);
        assert!(token.starts_with("github_111_1700000000000_"));
        assert!(token.split('_').count() >= 4);
    }
}
