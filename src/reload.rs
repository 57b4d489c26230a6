//! Periodic rule reloading.
//!
//! A background task reloads the rule document on a fixed interval and
//! pushes each snapshot into the limiter. A failed load keeps the previous
//! rules active. Counters already created keep their state; callers that
//! need a changed quota applied immediately use
//! [`RateLimiter::invalidate`](crate::ratelimit::RateLimiter::invalidate).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{QuotaError, Result};
use crate::ratelimit::{RateLimiter, RuleSource};

/// Handle to a running reload task.
pub struct RuleReloader {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RuleReloader {
    /// Spawn the reload loop on the current tokio runtime.
    ///
    /// The first reload happens one `interval` after spawning. A zero
    /// interval is rejected.
    pub fn spawn<S>(limiter: Arc<RateLimiter>, source: S, interval: Duration) -> Result<Self>
    where
        S: RuleSource + 'static,
    {
        if interval.is_zero() {
            return Err(QuotaError::InvalidParameter(
                "reload interval must be positive".to_string(),
            ));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);

        info!(
            source = %source.describe(),
            interval_secs = interval.as_secs_f64(),
            "Starting rule reloader"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reload_once(&limiter, &source);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Rule reloader stopped");
        });

        Ok(Self { shutdown, task })
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Rule reloader task failed");
        }
    }
}

/// Load one snapshot and apply it, logging rather than propagating failures.
pub fn reload_once(limiter: &RateLimiter, source: &dyn RuleSource) -> bool {
    match source.load() {
        Ok(config) => {
            limiter.replace_rules(&config);
            debug!(source = %source.describe(), rules = config.len(), "Rules reloaded");
            true
        }
        Err(e) => {
            warn!(
                source = %source.describe(),
                error = %e,
                "Failed to reload rules, keeping previous rule set"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FileRuleSource, QuotaRule, RuleConfig, StaticRuleSource};
    use std::io::Write;

    struct FailingSource;

    impl RuleSource for FailingSource {
        fn load(&self) -> Result<RuleConfig> {
            Err(QuotaError::Config("unreachable config service".into()))
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[test]
    fn test_reload_once_applies_snapshot() {
        let limiter = RateLimiter::new();
        let source = StaticRuleSource::new(RuleConfig::from_rules(vec![
            QuotaRule::new("app", "/a", 1, 1).unwrap(),
        ]));

        assert!(reload_once(&limiter, &source));
        assert!(limiter.rule("app", "/a").is_some());
    }

    #[test]
    fn test_failed_reload_keeps_rules() {
        let limiter = RateLimiter::builder()
            .rules(RuleConfig::from_rules(vec![QuotaRule::new("app", "/a", 1, 1).unwrap()]))
            .build();

        assert!(!reload_once(&limiter, &FailingSource));
        assert!(limiter.rule("app", "/a").is_some());
    }

    #[tokio::test]
    async fn test_reloader_picks_up_file_changes() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"limits: []\n").unwrap();

        let limiter = Arc::new(RateLimiter::new());
        let source = FileRuleSource::new(file.path()).unwrap();
        let reloader = RuleReloader::spawn(limiter.clone(), source, Duration::from_millis(20)).unwrap();

        std::fs::write(
            file.path(),
            "limits:\n  - app_id: app\n    api: /a\n    limit: 2\n    window_seconds: 1\n",
        )
        .unwrap();

        let mut found = false;
        for _ in 0..50 {
            if limiter.rule("app", "/a").is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        reloader.shutdown().await;

        assert!(found, "reloader never applied the new rules");
        assert_eq!(limiter.rule("app", "/a").unwrap().limit(), 2);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let limiter = Arc::new(RateLimiter::new());
        let source = StaticRuleSource::new(RuleConfig::new());

        let err = RuleReloader::spawn(limiter, source, Duration::ZERO).err().unwrap();
        assert!(matches!(err, QuotaError::InvalidParameter(_)));
    }
}
