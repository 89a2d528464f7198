//! The Compass client façade.
//!
//! One entry point — [`CompassClient::execute`] — funnels every external
//! call through the same pipeline: validate params, scope the cache key to
//! the session, consult cache, consult the circuit breaker, coalesce with
//! any identical in-flight call, retry the transport under the operation's
//! policy, then validate, ownership-check, and commit the response.
//!
//! All maps (cache, pending flights, circuit states) are instance fields
//! built by dependency injection, so isolated clients coexist in tests
//! and across logical sessions. There is no global state anywhere.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use compass_core::{
    new_trace_id, AuthError, Clock, CompassConfig, CompassError, CompassResult, OperationConfig,
    OwnershipError, SystemClock, TransportError, ValidationError,
};
use compass_store::{CacheStats, CacheStore, Deduplicator, KeyValueStore, ScopedCacheKey};

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::retry;
use crate::session_manager::SessionManager;
use crate::transport::{Transport, TransportResponse};

/// A successful `execute` outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: Value,
    /// True when `data` is the operation's degradation payload rather
    /// than an upstream response.
    pub fallback: bool,
    /// True when `data` was served from cache (including revalidation).
    pub from_cache: bool,
}

/// The resilient, session-isolated data-access client.
pub struct CompassClient {
    transport: Arc<dyn Transport>,
    config: CompassConfig,
    cache: Arc<CacheStore>,
    dedup: Deduplicator<Result<TransportResponse, TransportError>>,
    circuit: Arc<CircuitBreaker>,
    sessions: SessionManager,
}

impl CompassClient {
    /// Build a client on the system clock.
    pub fn new(
        transport: Arc<dyn Transport>,
        kv: Arc<dyn KeyValueStore>,
        config: CompassConfig,
    ) -> CompassResult<Self> {
        Self::with_clock(transport, kv, config, Arc::new(SystemClock))
    }

    /// Build a client with an injected clock (tests drive TTL and circuit
    /// windows through this).
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        kv: Arc<dyn KeyValueStore>,
        config: CompassConfig,
        clock: Arc<dyn Clock>,
    ) -> CompassResult<Self> {
        config.validate()?;

        let cache = Arc::new(CacheStore::new(clock.clone(), config.cache));
        let sessions = SessionManager::new(kv, cache.clone(), clock.clone(), config.session.clone());

        Ok(Self {
            transport,
            cache,
            dedup: Deduplicator::new(),
            circuit: Arc::new(CircuitBreaker::new(clock)),
            sessions,
            config,
        })
    }

    /// Session lifecycle (initialize / integrity / logout).
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Cache usage counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current breaker state for an operation.
    pub fn circuit_state(&self, operation: &str) -> CircuitState {
        self.circuit.state(operation)
    }

    /// Consecutive-failure count the breaker holds for an operation.
    pub fn circuit_failures(&self, operation: &str) -> u32 {
        self.circuit.consecutive_failures(operation)
    }

    /// Execute an operation without caller-side cancellation.
    pub async fn execute(&self, operation: &str, params: &Value) -> CompassResult<Fetched> {
        self.execute_cancellable(operation, params, CancellationToken::new())
            .await
    }

    /// Execute an operation; cancelling the token aborts the transport
    /// call and any backoff sleep cooperatively.
    ///
    /// Note: when a call coalesces onto an already-pending flight, the
    /// flight keeps the token it was started with.
    pub async fn execute_cancellable(
        &self,
        operation: &str,
        params: &Value,
        cancel: CancellationToken,
    ) -> CompassResult<Fetched> {
        let trace_id = new_trace_id();
        let op_cfg = self.config.operations.get(operation)?.clone();

        // 1. Validate params before any network I/O.
        let params = match &op_cfg.input_schema {
            Some(schema) => match schema.validate(params).into_result() {
                Ok(clean) => clean,
                Err(violation) => {
                    tracing::warn!(
                        trace_id = %trace_id,
                        operation,
                        error = %violation,
                        "rejecting invalid params"
                    );
                    return Err(violation.into());
                }
            },
            None => params.clone(),
        };

        // 2. Scope the key to the session. Owner-scoped operations are
        // meaningless without one.
        let session = self.sessions.current_session().await;
        if op_cfg.owner_field.is_some() && session.is_none() {
            return Err(AuthError::MissingSession.into());
        }
        let key = match &session {
            Some(s) => ScopedCacheKey::for_user(operation, &params, &s.user_id),
            None => ScopedCacheKey::anonymous(operation, &params),
        };

        // 3. Cache hit returns immediately — a fresh-enough answer is
        // never blocked by an unrelated outage.
        if let Some(data) = self.cache.get(&key) {
            tracing::debug!(trace_id = %trace_id, operation, key = %key, "cache hit");
            return Ok(Fetched {
                data,
                fallback: false,
                from_cache: true,
            });
        }

        // 4. Circuit check: fail fast while open.
        if let Err(circuit_err) = self.circuit.check(operation, &op_cfg.circuit) {
            tracing::warn!(
                trace_id = %trace_id,
                operation,
                error = %circuit_err,
                "circuit open, failing fast"
            );
            return self.degrade(operation, &op_cfg, circuit_err.into());
        }

        // 5. Coalesce with any identical in-flight call; the single
        // flight runs the retry executor around the transport. The
        // breaker records exactly one outcome per flight, not per waiter.
        let outcome = {
            let transport = Arc::clone(&self.transport);
            let circuit = Arc::clone(&self.circuit);
            let operation_owned = operation.to_string();
            let circuit_policy = op_cfg.circuit.clone();
            let retry_policy = op_cfg.retry.clone();
            let call_timeout = op_cfg.call_timeout;
            let call_params = params.clone();
            let tag = self.cache.revalidation_tag(&key);

            self.dedup
                .run_exclusive(&key, move || async move {
                    let op_for_call = operation_owned.clone();
                    let result = retry::execute(&retry_policy, call_timeout, &cancel, move || {
                        let transport = Arc::clone(&transport);
                        let operation = op_for_call.clone();
                        let params = call_params.clone();
                        let tag = tag.clone();
                        async move { transport.call(&operation, &params, tag.as_deref()).await }
                    })
                    .await;

                    match &result {
                        Ok(_) => circuit.record_success(&operation_owned),
                        Err(_) => circuit.record_failure(&operation_owned, &circuit_policy),
                    }
                    result
                })
                .await
        };

        // 6/7. Commit or degrade.
        match outcome {
            Ok(TransportResponse::NotModified) => {
                if let Some(data) = self.cache.touch(&key) {
                    tracing::debug!(trace_id = %trace_id, operation, key = %key, "revalidated");
                    Ok(Fetched {
                        data,
                        fallback: false,
                        from_cache: true,
                    })
                } else {
                    // The retained entry vanished mid-flight (session
                    // switch cleared the cache).
                    tracing::warn!(
                        trace_id = %trace_id,
                        operation,
                        "not-modified answer without a retained entry"
                    );
                    Err(ValidationError::InvalidPayload {
                        reason: "upstream reported not-modified but no entry is retained"
                            .to_string(),
                    }
                    .into())
                }
            }
            Ok(TransportResponse::Payload {
                data,
                revalidation_tag,
            }) => {
                self.commit(
                    &trace_id.to_string(),
                    operation,
                    &op_cfg,
                    session.as_ref().map(|s| s.user_id.as_str()),
                    key,
                    data,
                    revalidation_tag,
                )
            }
            Err(err) => {
                if matches!(err, TransportError::Auth { .. }) {
                    tracing::error!(
                        security = true,
                        trace_id = %trace_id,
                        operation,
                        "upstream rejected session credentials, tearing down session"
                    );
                    self.sessions.logout().await?;
                }
                tracing::warn!(
                    trace_id = %trace_id,
                    operation,
                    kind = err.kind_label(),
                    error = %err,
                    "operation failed after retries"
                );
                self.degrade(operation, &op_cfg, err.into())
            }
        }
    }

    /// Validate, ownership-check, and cache a fresh payload.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        trace_id: &str,
        operation: &str,
        op_cfg: &OperationConfig,
        session_user: Option<&str>,
        key: ScopedCacheKey,
        data: Value,
        revalidation_tag: Option<String>,
    ) -> CompassResult<Fetched> {
        let clean = match &op_cfg.response_schema {
            Some(schema) => match schema.validate(&data).into_result() {
                Ok(clean) => clean,
                Err(violation) => {
                    tracing::warn!(
                        trace_id = %trace_id,
                        operation,
                        error = %violation,
                        "discarding invalid upstream response"
                    );
                    return Err(violation.into());
                }
            },
            None => data,
        };

        if let Some(owner_field) = &op_cfg.owner_field {
            // Presence of a session was checked before the call.
            let expected = session_user.unwrap_or_default();
            let found = owner_value(&clean, owner_field);
            if found.as_deref() != Some(expected) {
                let err = OwnershipError::Mismatch {
                    operation: operation.to_string(),
                    expected: expected.to_string(),
                    found: found.unwrap_or_else(|| "<missing>".to_string()),
                };
                tracing::error!(
                    security = true,
                    trace_id = %trace_id,
                    operation,
                    error = %err,
                    "ownership mismatch, payload discarded"
                );
                return Err(err.into());
            }
        }

        self.cache
            .set(key, clean.clone(), op_cfg.cache_ttl, revalidation_tag);
        Ok(Fetched {
            data: clean,
            fallback: false,
            from_cache: false,
        })
    }

    /// Return the operation's degradation payload, or propagate the error.
    fn degrade(
        &self,
        operation: &str,
        op_cfg: &OperationConfig,
        err: CompassError,
    ) -> CompassResult<Fetched> {
        if let Some(fallback) = &op_cfg.fallback {
            tracing::info!(operation, error = %err, "returning degraded fallback payload");
            return Ok(Fetched {
                data: fallback.clone(),
                fallback: true,
                from_cache: false,
            });
        }
        Err(err)
    }
}

impl std::fmt::Debug for CompassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompassClient")
            .field("operations", &self.config.operations.len())
            .field("cache", &self.cache)
            .field("circuit", &self.circuit)
            .finish()
    }
}

/// Resolve a dot-path owner field ("id", "owner.id") to a comparable
/// string. Numbers compare by their decimal rendering, matching the
/// string user ids carried in session tokens.
fn owner_value(data: &Value, path: &str) -> Option<String> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
