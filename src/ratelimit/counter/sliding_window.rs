//! Sliding-window counter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use super::{require_positive, Algorithm, RateLimitAlgorithm};
use crate::clock::Clock;
use crate::error::Result;

/// Keeps the timestamp of every admission in the trailing window.
///
/// Exact at window boundaries, at the cost of memory proportional to
/// `limit` and pruning work on every call.
pub struct SlidingWindowCounter {
    /// Admission timestamps, oldest first
    timestamps: Mutex<VecDeque<u64>>,
    limit: u64,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    pub fn new(limit: u64, window_ms: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        let limit = require_positive(limit, "limit")?;
        let window_ms = require_positive(window_ms, "window size")?;

        Ok(Self {
            timestamps: Mutex::new(VecDeque::with_capacity(limit.min(1024) as usize)),
            limit,
            window_ms,
            clock,
        })
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Drop admissions that have left the window.
    fn prune(&self, timestamps: &mut VecDeque<u64>, now: u64) {
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_sub(oldest) <= self.window_ms {
                break;
            }
            timestamps.pop_front();
        }
    }
}

impl RateLimitAlgorithm for SlidingWindowCounter {
    fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);

        let admitted = (timestamps.len() as u64) < self.limit;
        if admitted {
            timestamps.push_back(now);
        }

        trace!(
            admitted = admitted,
            count = timestamps.len(),
            limit = self.limit,
            "Sliding-window decision"
        );
        Ok(admitted)
    }

    fn current_count(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);
        timestamps.len() as u64
    }

    /// Milliseconds until the oldest admission leaves the window.
    fn time_to_next_window(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);

        match timestamps.front() {
            Some(&oldest) => self.window_ms.saturating_sub(now.saturating_sub(oldest)),
            None => 0,
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn kind(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn manual_counter(limit: u64, window_ms: u64) -> (Arc<ManualClock>, SlidingWindowCounter) {
        let clock = Arc::new(ManualClock::new(0));
        let counter = SlidingWindowCounter::new(limit, window_ms, clock.clone()).unwrap();
        (clock, counter)
    }

    #[test]
    fn test_admits_up_to_limit() {
        let (_, counter) = manual_counter(3, 1000);
        assert!(counter.try_acquire().unwrap());
        assert!(counter.try_acquire().unwrap());
        assert!(counter.try_acquire().unwrap());
        assert!(!counter.try_acquire().unwrap());
        assert_eq!(counter.current_count(), 3);
    }

    #[test]
    fn test_admission_expires_after_window() {
        let (clock, counter) = manual_counter(1, 1000);
        assert!(counter.try_acquire().unwrap());

        clock.advance(1000);
        assert_eq!(counter.current_count(), 1);

        clock.advance(1);
        assert_eq!(counter.current_count(), 0);
        assert!(counter.try_acquire().unwrap());
    }

    #[test]
    fn test_no_boundary_burst() {
        let (clock, counter) = manual_counter(2, 1000);

        clock.set(900);
        assert!(counter.try_acquire().unwrap());
        assert!(counter.try_acquire().unwrap());

        // A fixed window would have reset here; the trailing window has not
        clock.set(1100);
        assert!(!counter.try_acquire().unwrap());

        clock.set(1901);
        assert!(counter.try_acquire().unwrap());
    }

    #[test]
    fn test_time_to_next_window_tracks_oldest() {
        let (clock, counter) = manual_counter(2, 1000);
        assert_eq!(counter.time_to_next_window(), 0);

        counter.try_acquire().unwrap();
        clock.advance(400);
        counter.try_acquire().unwrap();
        assert_eq!(counter.time_to_next_window(), 600);

        clock.advance(601);
        assert_eq!(counter.time_to_next_window(), 399);
    }

    #[test]
    fn test_clock_rollback_keeps_entries() {
        let (clock, counter) = manual_counter(2, 1000);
        clock.set(5000);
        counter.try_acquire().unwrap();

        clock.set(1000);
        assert_eq!(counter.current_count(), 1);
        assert_eq!(counter.time_to_next_window(), 1000);
    }

    #[test]
    fn test_invalid_parameters() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        assert!(SlidingWindowCounter::new(0, 1000, clock.clone()).is_err());
        assert!(SlidingWindowCounter::new(1, 0, clock).is_err());
    }

    #[test]
    fn test_concurrent_acquires_admit_exactly_limit() {
        let counter = SlidingWindowCounter::new(40, 60_000, Arc::new(MonotonicClock::new())).unwrap();
        let admitted = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if counter.try_acquire().unwrap() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 40);
        assert_eq!(counter.current_count(), 40);
    }
}
