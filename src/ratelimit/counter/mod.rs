//! Counting algorithms.
//!
//! Every algorithm tracks consumption against a single quota and answers
//! "admit?" for one quota key. They are interchangeable behind
//! [`RateLimitAlgorithm`]; the registry stores them as trait objects.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::{FixedWindowCounter, DEFAULT_RESET_LOCK_TIMEOUT};
pub use leaky_bucket::{LeakyBucketCounter, CATCH_UP_INTERVALS};
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucketCounter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::rules::QuotaRule;
use crate::clock::Clock;
use crate::error::{QuotaError, Result};

/// The counting algorithm backing a quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Count per fixed, non-overlapping window
    #[default]
    FixedWindow,
    /// Exact count over the trailing window
    SlidingWindow,
    /// Tokens refilled in whole intervals
    TokenBucket,
    /// Occupancy drained at a constant rate
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            other => Err(QuotaError::Config(format!("Unknown algorithm: {}", other))),
        }
    }
}

/// A live counter for one quota key.
///
/// Implementations must keep `current_count()` within `[0, limit()]` at every
/// observable instant, and a rejected `try_acquire` must leave the counter
/// unchanged.
pub trait RateLimitAlgorithm: Send + Sync {
    /// Try to admit one request.
    ///
    /// Returns `Ok(true)` when admitted, `Ok(false)` when the quota is
    /// exhausted, and an internal error when no trustworthy decision can be
    /// made.
    fn try_acquire(&self) -> Result<bool>;

    /// Consumption in the current accounting period.
    fn current_count(&self) -> u64;

    /// Milliseconds until capacity next becomes available.
    fn time_to_next_window(&self) -> u64;

    /// The configured limit or capacity.
    fn limit(&self) -> u64;

    fn kind(&self) -> Algorithm;
}

/// Builds counters from rules.
#[derive(Clone)]
pub struct CounterFactory {
    clock: Arc<dyn Clock>,
    default_algorithm: Algorithm,
    reset_lock_timeout: Duration,
}

impl CounterFactory {
    pub fn new(clock: Arc<dyn Clock>, default_algorithm: Algorithm, reset_lock_timeout: Duration) -> Self {
        Self {
            clock,
            default_algorithm,
            reset_lock_timeout,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// Construct a counter for `rule`.
    ///
    /// Token buckets refill the whole quota once per window; leaky buckets
    /// drain one request every `window / limit` milliseconds.
    pub fn build(&self, rule: &QuotaRule) -> Result<Arc<dyn RateLimitAlgorithm>> {
        let algorithm = rule.algorithm().unwrap_or(self.default_algorithm);
        let limit = rule.limit();
        let window_ms = rule.window_ms();
        let clock = self.clock.clone();

        debug!(
            app_id = %rule.app_id(),
            api = %rule.api(),
            limit = limit,
            window_ms = window_ms,
            algorithm = %algorithm,
            "Building counter"
        );

        let counter: Arc<dyn RateLimitAlgorithm> = match algorithm {
            Algorithm::FixedWindow => Arc::new(
                FixedWindowCounter::new(limit, window_ms, clock)?
                    .with_lock_timeout(self.reset_lock_timeout),
            ),
            Algorithm::SlidingWindow => Arc::new(SlidingWindowCounter::new(limit, window_ms, clock)?),
            Algorithm::TokenBucket => Arc::new(TokenBucketCounter::new(limit, limit, window_ms, clock)?),
            Algorithm::LeakyBucket => {
                let leak_interval_ms = (window_ms / limit).max(1);
                Arc::new(LeakyBucketCounter::new(limit, leak_interval_ms, clock)?)
            }
        };
        Ok(counter)
    }
}

impl fmt::Debug for CounterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterFactory")
            .field("default_algorithm", &self.default_algorithm)
            .field("reset_lock_timeout", &self.reset_lock_timeout)
            .finish()
    }
}

/// Reject a zero-valued construction parameter.
pub(crate) fn require_positive(value: u64, name: &str) -> Result<u64> {
    if value == 0 {
        return Err(QuotaError::InvalidParameter(format!("{} must be positive", name)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn factory(default_algorithm: Algorithm) -> CounterFactory {
        CounterFactory::new(
            Arc::new(ManualClock::new(0)),
            default_algorithm,
            DEFAULT_RESET_LOCK_TIMEOUT,
        )
    }

    #[test]
    fn test_factory_uses_default_algorithm() {
        let rule = QuotaRule::new("app", "/a", 10, 1).unwrap();
        let counter = factory(Algorithm::SlidingWindow).build(&rule).unwrap();
        assert_eq!(counter.kind(), Algorithm::SlidingWindow);
        assert_eq!(counter.limit(), 10);
    }

    #[test]
    fn test_rule_algorithm_overrides_default() {
        let rule = QuotaRule::new("app", "/a", 10, 1)
            .unwrap()
            .with_algorithm(Algorithm::LeakyBucket);
        let counter = factory(Algorithm::FixedWindow).build(&rule).unwrap();
        assert_eq!(counter.kind(), Algorithm::LeakyBucket);
    }

    #[test]
    fn test_every_algorithm_respects_limit() {
        for algorithm in [
            Algorithm::FixedWindow,
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket,
            Algorithm::LeakyBucket,
        ] {
            let rule = QuotaRule::new("app", "/a", 4, 10).unwrap().with_algorithm(algorithm);
            let counter = factory(Algorithm::FixedWindow).build(&rule).unwrap();

            let admitted = (0..10).filter(|_| counter.try_acquire().unwrap()).count();
            assert_eq!(admitted, 4, "{} admitted too many", algorithm);
            assert_eq!(counter.current_count(), 4, "{} miscounted", algorithm);
        }
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("token_bucket".parse::<Algorithm>().unwrap(), Algorithm::TokenBucket);
        assert!("bogus".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::default(), Algorithm::FixedWindow);
    }
}
