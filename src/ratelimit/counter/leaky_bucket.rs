//! Leaky-bucket counter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{require_positive, Algorithm, RateLimitAlgorithm};
use crate::clock::Clock;
use crate::error::Result;

/// Lag, in leak intervals, after which the leak clock snaps to now.
pub const CATCH_UP_INTERVALS: u64 = 10;

#[derive(Debug)]
struct BucketState {
    /// Admission timestamps, oldest first
    queue: VecDeque<u64>,
    last_leak: u64,
}

/// A bucket of admitted requests that drains one entry per
/// `leak_interval_ms`.
pub struct LeakyBucketCounter {
    state: Mutex<BucketState>,
    capacity: u64,
    leak_interval_ms: u64,
    clock: Arc<dyn Clock>,
}

impl LeakyBucketCounter {
    /// Create an empty bucket.
    pub fn new(capacity: u64, leak_interval_ms: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        let capacity = require_positive(capacity, "capacity")?;
        let leak_interval_ms = require_positive(leak_interval_ms, "leak interval")?;

        Ok(Self {
            state: Mutex::new(BucketState {
                queue: VecDeque::with_capacity(capacity.min(1024) as usize),
                last_leak: clock.now_millis(),
            }),
            capacity,
            leak_interval_ms,
            clock,
        })
    }

    /// Drain every entry whose leak is due.
    ///
    /// Each leak advances `last_leak` by exactly one interval. If the leak
    /// clock still trails by [`CATCH_UP_INTERVALS`] or more afterwards, it is
    /// snapped to `now` and the missed leaks are forgiven.
    fn leak(&self, state: &mut BucketState, now: u64) {
        while !state.queue.is_empty() && now.saturating_sub(state.last_leak) >= self.leak_interval_ms {
            state.queue.pop_front();
            state.last_leak += self.leak_interval_ms;
        }

        let lag = now.saturating_sub(state.last_leak);
        if lag >= self.leak_interval_ms.saturating_mul(CATCH_UP_INTERVALS) {
            debug!(lag_ms = lag, "Leak clock fell behind, snapping to now");
            state.last_leak = now;
        }
    }

    /// Milliseconds until the next leak; zero if empty or already due.
    pub fn time_to_next_leak(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.leak(&mut state, now);

        if state.queue.is_empty() {
            return 0;
        }
        self.leak_interval_ms
            .saturating_sub(now.saturating_sub(state.last_leak))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn leak_interval_ms(&self) -> u64 {
        self.leak_interval_ms
    }
}

impl RateLimitAlgorithm for LeakyBucketCounter {
    fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.leak(&mut state, now);

        let admitted = (state.queue.len() as u64) < self.capacity;
        if admitted {
            state.queue.push_back(now);
        }

        trace!(
            admitted = admitted,
            occupancy = state.queue.len(),
            capacity = self.capacity,
            "Leaky-bucket decision"
        );
        Ok(admitted)
    }

    fn current_count(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.leak(&mut state, now);
        state.queue.len() as u64
    }

    fn time_to_next_window(&self) -> u64 {
        self.time_to_next_leak()
    }

    fn limit(&self) -> u64 {
        self.capacity
    }

    fn kind(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }
}
