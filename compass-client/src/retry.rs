//! Bounded exponential-backoff retry around a single transport call.
//!
//! The executor owns two of the three suspension points in the whole
//! client (the call itself and the backoff sleep; the third is nothing —
//! every other step is synchronous). It retries only errors whose kind is
//! retryable, enforces the per-operation timeout on every attempt, and
//! observes the cancellation token during both the call and the sleep.
//! Whether an exhausted failure gets a fallback is the orchestrator's
//! decision, not this module's.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use compass_core::{RetryPolicy, TransportError};

/// Execute `attempt_fn` under `policy`.
///
/// `attempt_fn` is invoked once per attempt; each invocation runs under
/// `call_timeout` and the shared `cancel` token. Delay before attempt n
/// (n >= 2) is `min(base_delay * multiplier^(n-2), max_delay)`.
///
/// # Errors
/// The final attempt's error once retries are exhausted, the first
/// non-retryable error immediately, or `TransportError::Cancelled` as soon
/// as the token fires.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = policy.max_attempts();

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        if attempt >= 2 {
            let delay = policy.delay_before(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            attempted = tokio::time::timeout(call_timeout, attempt_fn()) => {
                attempted.unwrap_or(Err(TransportError::Timeout {
                    elapsed_ms: call_timeout.as_millis() as i64,
                }))
            }
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(
                    attempt,
                    max_attempts,
                    kind = err.kind_label(),
                    error = %err,
                    "transport attempt failed, will retry"
                );
            }
            Err(err) => return Err(err),
        }
    }

    // The loop always returns from its final iteration.
    Err(TransportError::Network {
        reason: "retry loop exited unexpectedly".to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
