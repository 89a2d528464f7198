//! In-flight request coalescing.
//!
//! Several dashboard widgets routinely ask for the same data in the same
//! frame. The deduplicator keys in-flight calls identically to the cache
//! and hands every concurrent caller the same shared future, so at most
//! one transport call per key is ever in flight. The pending entry is
//! removed when the underlying call settles — success or failure — before
//! the result reaches any waiter, so a follow-up call starts a fresh
//! flight instead of observing a stale one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::key::ScopedCacheKey;

type InFlight<T> = Shared<BoxFuture<'static, T>>;

/// Coalesces concurrent calls per cache key.
///
/// `T` is the settled outcome shared between waiters; in practice a
/// cloneable `Result`, so every waiter observes the identical resolution
/// or rejection.
pub struct Deduplicator<T: Clone> {
    inflight: Arc<Mutex<HashMap<ScopedCacheKey, InFlight<T>>>>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `factory` exclusively for `key`.
    ///
    /// If a flight for `key` is already pending, `factory` is NOT invoked
    /// and the pending flight's result is awaited instead.
    pub async fn run_exclusive<F, Fut>(&self, key: &ScopedCacheKey, factory: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(key) {
                existing.clone()
            } else {
                let map = Arc::clone(&self.inflight);
                let cleanup_key = key.clone();
                let call = factory();
                let flight = async move {
                    let result = call.await;
                    // Remove before any waiter sees the result.
                    map.lock().await.remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                inflight.insert(key.clone(), flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Whether a flight is currently pending for `key`.
    pub async fn is_pending(&self, key: &ScopedCacheKey) -> bool {
        self.inflight.lock().await.contains_key(key)
    }

    /// Number of pending flights.
    pub async fn pending_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Deduplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for Deduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator").finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
