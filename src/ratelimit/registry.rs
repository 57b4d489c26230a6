//! Live counter registry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::counter::{CounterFactory, RateLimitAlgorithm};
use super::key::QuotaKey;
use super::rules::QuotaRule;
use crate::error::Result;

/// Owns exactly one live counter per quota key.
///
/// Counters are created lazily on first traffic. Creation happens under the
/// key's shard lock, so racing first callers all receive the same instance
/// and no losing counter is ever built.
pub struct CounterRegistry {
    counters: DashMap<QuotaKey, Arc<dyn RateLimitAlgorithm>>,
    factory: CounterFactory,
}

impl CounterRegistry {
    pub fn new(factory: CounterFactory) -> Self {
        Self {
            counters: DashMap::new(),
            factory,
        }
    }

    /// Return the counter for `key`, building it from `rule` on first use.
    ///
    /// Once a counter exists, `rule` is ignored: a changed quota does not
    /// resize a live counter.
    pub fn get_or_create(&self, key: &QuotaKey, rule: &QuotaRule) -> Result<Arc<dyn RateLimitAlgorithm>> {
        if let Some(counter) = self.counters.get(key) {
            return Ok(counter.value().clone());
        }

        match self.counters.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let counter = self.factory.build(rule)?;
                info!(
                    key = %key,
                    limit = rule.limit(),
                    window_seconds = rule.window_seconds(),
                    algorithm = %counter.kind(),
                    "Creating new rate limit counter"
                );
                entry.insert(counter.clone());
                Ok(counter)
            }
        }
    }

    pub fn get(&self, key: &QuotaKey) -> Option<Arc<dyn RateLimitAlgorithm>> {
        self.counters.get(key).map(|entry| entry.value().clone())
    }

    /// Drop the live counter for `key`; the next request starts afresh.
    pub fn invalidate(&self, key: &QuotaKey) -> bool {
        let removed = self.counters.remove(key).is_some();
        if removed {
            debug!(key = %key, "Invalidated counter");
        }
        removed
    }

    /// Get the number of active counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn factory(&self) -> &CounterFactory {
        &self.factory
    }
}

impl std::fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("counters", &self.counters.len())
            .field("factory", &self.factory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::counter::{Algorithm, DEFAULT_RESET_LOCK_TIMEOUT};
    use std::sync::Barrier;

    fn registry() -> CounterRegistry {
        CounterRegistry::new(CounterFactory::new(
            Arc::new(ManualClock::new(0)),
            Algorithm::FixedWindow,
            DEFAULT_RESET_LOCK_TIMEOUT,
        ))
    }

    #[test]
    fn test_get_or_create_reuses_counter() {
        let registry = registry();
        let rule = QuotaRule::new("app", "/a", 5, 1).unwrap();
        let key = QuotaKey::new("app", "/a");

        let first = registry.get_or_create(&key, &rule).unwrap();
        let second = registry.get_or_create(&key, &rule).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_later_rule_is_ignored() {
        let registry = registry();
        let key = QuotaKey::new("app", "/a");

        let small = QuotaRule::new("app", "/a", 1, 1).unwrap();
        let large = QuotaRule::new("app", "/a", 100, 1).unwrap();

        registry.get_or_create(&key, &small).unwrap();
        let counter = registry.get_or_create(&key, &large).unwrap();
        assert_eq!(counter.limit(), 1);
    }

    #[test]
    fn test_invalidate_recreates() {
        let registry = registry();
        let key = QuotaKey::new("app", "/a");
        let rule = QuotaRule::new("app", "/a", 1, 1).unwrap();

        let first = registry.get_or_create(&key, &rule).unwrap();
        assert!(registry.invalidate(&key));
        assert!(!registry.invalidate(&key));

        let second = registry.get_or_create(&key, &rule).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_first_access_yields_one_counter() {
        let registry = registry();
        let key = QuotaKey::new("app", "/race");
        let rule = QuotaRule::new("app", "/race", 10, 1).unwrap();
        let barrier = Barrier::new(16);

        let counters: Vec<Arc<dyn RateLimitAlgorithm>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_or_create(&key, &rule).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        let installed = registry.get(&key).unwrap();
        assert!(counters.iter().all(|c| Arc::ptr_eq(c, &installed)));
    }
}
