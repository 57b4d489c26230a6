//! Quota rules and rule documents.
//!
//! A rule document is a flat list of `(app_id, api, limit, window_seconds)`
//! entries, optionally naming the counting algorithm to use:
//!
//! ```yaml
//! limits:
//!   - app_id: app1
//!     api: /v1/order
//!     limit: 100
//!     window_seconds: 1
//!     algorithm: sliding_window
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::counter::Algorithm;
use crate::error::{QuotaError, Result};

/// A configured limit of `limit` requests per `window_seconds` for one
/// `(app_id, api)` pair.
///
/// Rules are immutable; replacing a rule means inserting a new one under the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuotaRule")]
pub struct QuotaRule {
    app_id: String,
    api: String,
    limit: u64,
    window_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    algorithm: Option<Algorithm>,
}

/// Wire shape of a rule before validation.
#[derive(Debug, Deserialize)]
struct RawQuotaRule {
    #[serde(alias = "appId")]
    app_id: String,
    api: String,
    limit: u64,
    #[serde(alias = "windowSeconds", alias = "unit")]
    window_seconds: u64,
    #[serde(default)]
    algorithm: Option<Algorithm>,
}

impl TryFrom<RawQuotaRule> for QuotaRule {
    type Error = QuotaError;

    fn try_from(raw: RawQuotaRule) -> Result<Self> {
        let rule = QuotaRule::new(raw.app_id, raw.api, raw.limit, raw.window_seconds)?;
        Ok(match raw.algorithm {
            Some(algorithm) => rule.with_algorithm(algorithm),
            None => rule,
        })
    }
}

impl QuotaRule {
    /// Create a rule, rejecting empty identifiers and non-positive quotas.
    pub fn new(
        app_id: impl Into<String>,
        api: impl Into<String>,
        limit: u64,
        window_seconds: u64,
    ) -> Result<Self> {
        let app_id = app_id.into();
        let api = api.into();

        if app_id.is_empty() {
            return Err(QuotaError::InvalidParameter("app_id must not be empty".into()));
        }
        if api.is_empty() {
            return Err(QuotaError::InvalidParameter("api must not be empty".into()));
        }
        if limit == 0 {
            return Err(QuotaError::InvalidParameter(format!(
                "limit for {}:{} must be positive",
                app_id, api
            )));
        }
        if window_seconds == 0 {
            return Err(QuotaError::InvalidParameter(format!(
                "window_seconds for {}:{} must be positive",
                app_id, api
            )));
        }

        Ok(Self {
            app_id,
            api,
            limit,
            window_seconds,
            algorithm: None,
        })
    }

    /// Pin this rule to a specific counting algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    /// Maximum admitted requests per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window_ms(&self) -> u64 {
        self.window_seconds.saturating_mul(1000)
    }

    /// The algorithm requested by the rule, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }
}

impl fmt::Display for QuotaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} per {}s",
            self.app_id, self.api, self.limit, self.window_seconds
        )?;
        if let Some(algorithm) = self.algorithm {
            write!(f, " ({})", algorithm)?;
        }
        Ok(())
    }
}

/// A parsed rule document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub limits: Vec<QuotaRule>,
}

impl RuleConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(limits: Vec<QuotaRule>) -> Self {
        Self { limits }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let config: RuleConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse YAML rules: {}", e)))?;
        info!(rules = config.limits.len(), "Parsed YAML rule document");
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        let config: RuleConfig = serde_json::from_str(json)
            .map_err(|e| QuotaError::Config(format!("Failed to parse JSON rules: {}", e)))?;
        info!(rules = config.limits.len(), "Parsed JSON rule document");
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}
