//! Token-bucket counter.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use super::{require_positive, Algorithm, RateLimitAlgorithm};
use crate::clock::Clock;
use crate::error::Result;

#[derive(Debug)]
struct BucketState {
    available: u64,
    last_refill: u64,
}

/// Adds `refill_amount` tokens every `refill_interval_ms`, up to `capacity`.
///
/// Refills are counted in whole intervals and `last_refill` advances by
/// exactly those intervals, so the refill phase never drifts.
pub struct TokenBucketCounter {
    state: Mutex<BucketState>,
    capacity: u64,
    refill_amount: u64,
    refill_interval_ms: u64,
    clock: Arc<dyn Clock>,
}

impl TokenBucketCounter {
    /// Create a full bucket.
    pub fn new(
        capacity: u64,
        refill_amount: u64,
        refill_interval_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let capacity = require_positive(capacity, "capacity")?;
        let refill_amount = require_positive(refill_amount, "refill amount")?;
        let refill_interval_ms = require_positive(refill_interval_ms, "refill interval")?;

        Ok(Self {
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: clock.now_millis(),
            }),
            capacity,
            refill_amount,
            refill_interval_ms,
            clock,
        })
    }

    /// Credit every whole interval elapsed since the last refill.
    pub fn refill(&self) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);
    }

    fn refill_locked(&self, state: &mut BucketState, now: u64) {
        let intervals = now.saturating_sub(state.last_refill) / self.refill_interval_ms;
        if intervals == 0 {
            return;
        }

        let tokens = intervals.saturating_mul(self.refill_amount);
        state.available = state.available.saturating_add(tokens).min(self.capacity);
        state.last_refill += intervals * self.refill_interval_ms;
    }

    /// Tokens available right now, after refilling.
    pub fn available_tokens(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);
        state.available
    }

    /// Milliseconds until the next interval boundary, whether or not the
    /// bucket is full.
    pub fn time_to_next_refill(&self) -> u64 {
        let now = self.clock.now_millis();
        let state = self.state.lock();
        let elapsed = now.saturating_sub(state.last_refill);
        self.refill_interval_ms - elapsed % self.refill_interval_ms
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl RateLimitAlgorithm for TokenBucketCounter {
    fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.refill_locked(&mut state, now);

        let admitted = state.available > 0;
        if admitted {
            state.available -= 1;
        }

        trace!(
            admitted = admitted,
            available = state.available,
            capacity = self.capacity,
            "Token-bucket decision"
        );
        Ok(admitted)
    }

    /// Tokens consumed and not yet refilled.
    fn current_count(&self) -> u64 {
        self.capacity - self.available_tokens()
    }

    fn time_to_next_window(&self) -> u64 {
        self.time_to_next_refill()
    }

    fn limit(&self) -> u64 {
        self.capacity
    }

    fn kind(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}
