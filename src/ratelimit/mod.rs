//! Rate limiting logic and state management.

mod counter;
mod key;
mod limiter;
mod registry;
mod resolver;
mod rules;
mod source;

pub use counter::{
    Algorithm, CounterFactory, FixedWindowCounter, LeakyBucketCounter, RateLimitAlgorithm,
    SlidingWindowCounter, TokenBucketCounter, CATCH_UP_INTERVALS, DEFAULT_RESET_LOCK_TIMEOUT,
};
pub use key::QuotaKey;
pub use limiter::{Decision, RateLimiter, RateLimiterBuilder};
pub use registry::CounterRegistry;
pub use resolver::RuleResolver;
pub use rules::{QuotaRule, RuleConfig};
pub use source::{FileRuleSource, RuleFormat, RuleSource, StaticRuleSource};
