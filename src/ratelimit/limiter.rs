//! Core rate limiter implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::counter::{Algorithm, CounterFactory, DEFAULT_RESET_LOCK_TIMEOUT};
use super::key::QuotaKey;
use super::registry::CounterRegistry;
use super::resolver::RuleResolver;
use super::rules::{QuotaRule, RuleConfig};
use crate::clock::{Clock, MonotonicClock};
use crate::config::Settings;
use crate::error::Result;

/// Outcome of an admission check.
///
/// Internal failures are not a decision; they surface as the `Err` arm of
/// [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Admitted,
    Rejected,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Admitted => f.write_str("admitted"),
            Decision::Rejected => f.write_str("rejected"),
        }
    }
}

/// The admission-control facade.
///
/// Resolves the rule for `(app_id, api)` and forwards to that key's counter.
/// Routes without a rule are admitted. This struct is thread-safe and can be
/// shared across threads and tasks.
pub struct RateLimiter {
    rules: RuleResolver,
    counters: CounterRegistry,
}

impl RateLimiter {
    /// Create a rate limiter with no rules and default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Create a rate limiter tuned by `settings`, starting with `rules`.
    pub fn from_settings(settings: &Settings, rules: RuleConfig) -> Self {
        Self::builder()
            .default_algorithm(settings.default_algorithm)
            .reset_lock_timeout(Duration::from_millis(settings.reset_lock_timeout_ms))
            .rules(rules)
            .build()
    }

    /// Decide whether the current request for `(app_id, api)` may proceed.
    ///
    /// Errors mean the limiter could not decide; callers choose whether to
    /// fail open or closed.
    pub fn admit(&self, app_id: &str, api: &str) -> Result<Decision> {
        let Some(rule) = self.rules.lookup(app_id, api) else {
            trace!(app_id = %app_id, api = %api, "No rule configured, admitting");
            return Ok(Decision::Admitted);
        };

        let key = QuotaKey::new(app_id, rule.api());
        let counter = self.counters.get_or_create(&key, &rule)?;

        let admitted = counter.try_acquire().map_err(|e| {
            warn!(key = %key, error = %e, "Rate limiter failed to decide");
            e
        })?;

        if admitted {
            trace!(key = %key, count = counter.current_count(), "Request admitted");
            Ok(Decision::Admitted)
        } else {
            debug!(
                key = %key,
                count = counter.current_count(),
                limit = counter.limit(),
                "Rate limit exceeded"
            );
            Ok(Decision::Rejected)
        }
    }

    /// Insert or replace a rule. Live counters keep their state.
    pub fn add_rule(&self, rule: QuotaRule) {
        self.rules.add(rule);
    }

    pub fn remove_rule(&self, app_id: &str, api: &str) -> Option<Arc<QuotaRule>> {
        self.rules.remove(app_id, api)
    }

    /// Swap in a whole rule snapshot. Live counters keep their state.
    pub fn replace_rules(&self, config: &RuleConfig) {
        self.rules.replace_all(config);
    }

    pub fn rule(&self, app_id: &str, api: &str) -> Option<Arc<QuotaRule>> {
        self.rules.lookup(app_id, api)
    }

    pub fn rules(&self) -> Vec<Arc<QuotaRule>> {
        self.rules.snapshot()
    }

    /// Drop the live counter for `(app_id, api)` so the next request builds
    /// a fresh one from the current rule.
    pub fn invalidate(&self, app_id: &str, api: &str) -> bool {
        self.counters.invalidate(&QuotaKey::new(app_id, api))
    }

    /// Get the current count for a key.
    ///
    /// Returns `None` if no counter exists for the key.
    pub fn current_count(&self, key: &QuotaKey) -> Option<u64> {
        self.counters.get(key).map(|c| c.current_count())
    }

    /// Milliseconds until the key's counter frees capacity.
    pub fn time_to_next_window(&self, key: &QuotaKey) -> Option<u64> {
        self.counters.get(key).map(|c| c.time_to_next_window())
    }

    /// Get the number of active counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules.len())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    clock: Arc<dyn Clock>,
    default_algorithm: Algorithm,
    reset_lock_timeout: Duration,
    rules: RuleConfig,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            default_algorithm: Algorithm::default(),
            reset_lock_timeout: DEFAULT_RESET_LOCK_TIMEOUT,
            rules: RuleConfig::new(),
        }
    }
}

impl RateLimiterBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Algorithm for rules that do not name one.
    pub fn default_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.default_algorithm = algorithm;
        self
    }

    pub fn reset_lock_timeout(mut self, timeout: Duration) -> Self {
        self.reset_lock_timeout = timeout;
        self
    }

    pub fn rules(mut self, rules: RuleConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn build(self) -> RateLimiter {
        let factory = CounterFactory::new(self.clock, self.default_algorithm, self.reset_lock_timeout);
        RateLimiter {
            rules: RuleResolver::from_config(&self.rules),
            counters: CounterRegistry::new(factory),
        }
    }
}
