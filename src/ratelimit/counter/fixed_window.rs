//! Fixed-window counter.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use super::{require_positive, Algorithm, RateLimitAlgorithm};
use crate::clock::Clock;
use crate::error::{QuotaError, Result};

/// Maximum wait for the window-reset lock before giving up.
pub const DEFAULT_RESET_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Counts admissions within fixed windows of `window_ms`.
///
/// The hot path is lock-free. Only a window reset takes `reset_lock`, with a
/// bounded wait and a second look at the window once the lock is held, so
/// that threads which all saw the same stale window reset it once.
pub struct FixedWindowCounter {
    /// Admissions in the current window
    count: AtomicU64,
    /// Clock reading at which the current window began
    window_start: AtomicU64,
    limit: u64,
    window_ms: u64,
    reset_lock: Mutex<()>,
    lock_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl FixedWindowCounter {
    /// Create a counter whose first window starts now.
    pub fn new(limit: u64, window_ms: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        let limit = require_positive(limit, "limit")?;
        let window_ms = require_positive(window_ms, "window size")?;

        debug!(limit = limit, window_ms = window_ms, "Created fixed-window counter");

        Ok(Self {
            count: AtomicU64::new(0),
            window_start: AtomicU64::new(clock.now_millis()),
            limit,
            window_ms,
            reset_lock: Mutex::new(()),
            lock_timeout: DEFAULT_RESET_LOCK_TIMEOUT,
            clock,
        })
    }

    /// Override how long a reset may wait for the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn needs_reset(&self, now: u64, window_start: u64) -> bool {
        now < window_start || now - window_start > self.window_ms
    }

    /// Start a new window if the current one has expired.
    fn reset_window(&self) -> Result<()> {
        let Some(_guard) = self.reset_lock.try_lock_for(self.lock_timeout) else {
            warn!(
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "Failed to acquire window reset lock"
            );
            return Err(QuotaError::LockTimeout {
                timeout_ms: self.lock_timeout.as_millis() as u64,
            });
        };

        let now = self.clock.now_millis();
        let window_start = self.window_start.load(Ordering::SeqCst);

        if now < window_start {
            error!(
                now_ms = now,
                window_start_ms = window_start,
                "Clock moved backwards"
            );
            return Err(QuotaError::ClockMovedBackwards {
                now_ms: now,
                window_start_ms: window_start,
            });
        }

        // Another thread may have reset while we waited.
        if now - window_start > self.window_ms {
            debug!(
                old_count = self.count.load(Ordering::SeqCst),
                window_start_ms = now,
                "Resetting fixed window"
            );
            self.count.store(0, Ordering::SeqCst);
            self.window_start.store(now, Ordering::SeqCst);
        }

        Ok(())
    }
}

impl RateLimitAlgorithm for FixedWindowCounter {
    fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.now_millis();
        if self.needs_reset(now, self.window_start.load(Ordering::SeqCst)) {
            self.reset_window()?;
        }

        // Increment only while below the limit so the count never overshoots.
        let admitted = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < self.limit).then_some(count + 1)
            })
            .is_ok();

        trace!(
            admitted = admitted,
            count = self.count.load(Ordering::SeqCst),
            limit = self.limit,
            "Fixed-window decision"
        );
        Ok(admitted)
    }

    fn current_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    fn time_to_next_window(&self) -> u64 {
        let now = self.clock.now_millis();
        let window_start = self.window_start.load(Ordering::SeqCst);
        if now < window_start {
            warn!("Clock moved backwards, reporting next window as due");
            return 0;
        }
        self.window_ms.saturating_sub(now - window_start)
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn kind(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};

    fn manual_counter(limit: u64, window_ms: u64) -> (Arc<ManualClock>, FixedWindowCounter) {
        let clock = Arc::new(ManualClock::new(10_000));
        let counter = FixedWindowCounter::new(limit, window_ms, clock.clone()).unwrap();
        (clock, counter)
    }

    #[test]
    fn test_counter_within_limit() {
        let (_, counter) = manual_counter(10, 1000);

        assert!(counter.try_acquire().unwrap());
        assert_eq!(counter.current_count(), 1);
    }

    #[test]
    fn test_counter_exceeds_limit() {
        let (_, counter) = manual_counter(5, 1000);

        for _ in 0..5 {
            assert!(counter.try_acquire().unwrap());
        }

        // The 6th request should be rejected without moving the count
        assert!(!counter.try_acquire().unwrap());
        assert_eq!(counter.current_count(), 5);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (clock, counter) = manual_counter(2, 1000);

        assert!(counter.try_acquire().unwrap());
        assert!(counter.try_acquire().unwrap());
        assert!(!counter.try_acquire().unwrap());

        // Exactly one window later is still the same window
        clock.advance(1000);
        assert!(!counter.try_acquire().unwrap());

        clock.advance(1);
        assert!(counter.try_acquire().unwrap());
        assert_eq!(counter.current_count(), 1);
    }

    #[test]
    fn test_time_to_next_window() {
        let (clock, counter) = manual_counter(1, 1000);
        assert_eq!(counter.time_to_next_window(), 1000);

        clock.advance(300);
        assert_eq!(counter.time_to_next_window(), 700);

        clock.advance(5000);
        assert_eq!(counter.time_to_next_window(), 0);

        // Rollback clamps to zero
        clock.set(0);
        assert_eq!(counter.time_to_next_window(), 0);
    }

    #[test]
    fn test_clock_rollback_is_internal_error() {
        let (clock, counter) = manual_counter(3, 1000);
        assert!(counter.try_acquire().unwrap());

        clock.rewind(2000);
        let err = counter.try_acquire().unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(err, QuotaError::ClockMovedBackwards { .. }));

        // No silent reset happened
        assert_eq!(counter.current_count(), 1);
    }

    #[test]
    fn test_reset_lock_timeout_is_internal_error() {
        let (clock, counter) = manual_counter(3, 1000);
        let counter = counter.with_lock_timeout(Duration::from_millis(20));
        clock.advance(1001);

        let _held = counter.reset_lock.lock();
        let result = std::thread::scope(|s| s.spawn(|| counter.try_acquire()).join().unwrap());

        let err = result.unwrap_err();
        assert!(matches!(err, QuotaError::LockTimeout { timeout_ms: 20 }));
    }

    #[test]
    fn test_invalid_parameters() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        assert!(FixedWindowCounter::new(0, 1000, clock.clone()).is_err());
        assert!(FixedWindowCounter::new(1, 0, clock).is_err());
    }

    #[test]
    fn test_concurrent_acquires_admit_exactly_limit() {
        let counter = FixedWindowCounter::new(50, 60_000, Arc::new(MonotonicClock::new())).unwrap();
        let admitted = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..25 {
                        if counter.try_acquire().unwrap() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                        assert!(counter.current_count() <= 50);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(counter.current_count(), 50);
    }

    #[test]
    fn test_concurrent_reset_happens_once() {
        let (clock, counter) = manual_counter(100, 1000);
        for _ in 0..100 {
            counter.try_acquire().unwrap();
        }
        clock.advance(1500);

        std::thread::scope(|s| {
            for _ in 0..10 {
                s.spawn(|| assert!(counter.try_acquire().unwrap()));
            }
        });

        assert_eq!(counter.current_count(), 10);
    }
}
