//! Rule resolution.
//!
//! Rules are indexed by their literal `app_id:api` key. Lookup is exact
//! match only; there is no prefix or path-segment matching.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::key::QuotaKey;
use super::rules::{QuotaRule, RuleConfig};

/// Concurrent map from quota key to rule.
///
/// Rules are stored behind `Arc` and swapped whole, so a lookup never sees a
/// partially applied rule.
#[derive(Debug, Default)]
pub struct RuleResolver {
    rules: DashMap<QuotaKey, Arc<QuotaRule>>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from a rule document. Later duplicates win.
    pub fn from_config(config: &RuleConfig) -> Self {
        let resolver = Self::new();
        for rule in &config.limits {
            resolver.add(rule.clone());
        }
        info!(rules = resolver.len(), "Rule resolver initialized");
        resolver
    }

    /// Find the rule for `(app_id, api)`.
    pub fn lookup(&self, app_id: &str, api: &str) -> Option<Arc<QuotaRule>> {
        self.rules
            .get(&QuotaKey::new(app_id, api))
            .map(|entry| entry.value().clone())
    }

    /// Insert or replace the rule under its key.
    pub fn add(&self, rule: QuotaRule) {
        let key = QuotaKey::new(rule.app_id(), rule.api());
        debug!(key = %key, rule = %rule, "Adding rule");
        self.rules.insert(key, Arc::new(rule));
    }

    /// Delete the rule for `(app_id, api)`, returning it if present.
    pub fn remove(&self, app_id: &str, api: &str) -> Option<Arc<QuotaRule>> {
        let key = QuotaKey::new(app_id, api);
        let removed = self.rules.remove(&key).map(|(_, rule)| rule);
        if removed.is_some() {
            debug!(key = %key, "Removed rule");
        }
        removed
    }

    /// Make the rule set equal to `config`.
    ///
    /// Keys missing from the snapshot are removed and the rest inserted.
    /// Concurrent lookups see each key either before or after its update.
    pub fn replace_all(&self, config: &RuleConfig) {
        let incoming: HashSet<QuotaKey> = config
            .limits
            .iter()
            .map(|rule| QuotaKey::new(rule.app_id(), rule.api()))
            .collect();

        self.rules.retain(|key, _| incoming.contains(key));
        for rule in &config.limits {
            self.rules.insert(
                QuotaKey::new(rule.app_id(), rule.api()),
                Arc::new(rule.clone()),
            );
        }

        info!(rules = self.rules.len(), "Rule set replaced");
    }

    /// A point-in-time copy of every rule, ordered by key.
    pub fn snapshot(&self) -> Vec<Arc<QuotaRule>> {
        let mut rules: Vec<(QuotaKey, Arc<QuotaRule>)> = self
            .rules
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        rules.into_iter().map(|(_, rule)| rule).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
