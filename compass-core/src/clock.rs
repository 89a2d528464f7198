//! Clock abstraction for deterministic time handling.
//!
//! Token expiry, cache TTLs, and circuit reset windows all compare against
//! "now". Owning that comparison behind a trait keeps every time-dependent
//! code path testable with a fixed or manually advanced clock instead of
//! sleeping in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::identity::EpochMs;

/// Source of the current time as Unix epoch milliseconds.
///
/// Production code uses [`SystemClock`]; tests inject [`ManualClock`] to
/// drive TTL and reset-window boundaries precisely.
pub trait Clock: Send + Sync {
    /// Get current time as Unix epoch milliseconds.
    fn now_ms(&self) -> EpochMs;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Starts at the given epoch-ms instant and only moves when `advance_ms`
/// or `set_ms` is called, making TTL-boundary tests exact.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock at the given epoch-ms instant.
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Create a shared manual clock, the usual test shape.
    pub fn shared(start_ms: EpochMs) -> Arc<Self> {
        Arc::new(Self::new(start_ms))
    }

    /// Move the clock forward by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Pin the clock to an absolute instant.
    pub fn set_ms(&self, now_ms: EpochMs) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_is_fixed_until_advanced() {
        let clock = ManualClock::new(1_700_000_000_000);
        assert_eq!(clock.now_ms(), 1_700_000_000_000);
        assert_eq!(clock.now_ms(), 1_700_000_000_000);

        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1_700_000_000_250);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(0);
        clock.set_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }
}
