//! Configuration management for Quotagate.
//!
//! Settings come from an optional file (YAML, JSON or TOML, by extension)
//! overlaid with `QUOTAGATE_*` environment variables, e.g.
//! `QUOTAGATE_RESET_LOCK_TIMEOUT_MS=500`. Nested keys are separated by `__`.

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};
use crate::ratelimit::Algorithm;

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "QUOTAGATE";

/// Process-level configuration for the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the rate limit rule document
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Algorithm for rules that do not name one
    #[serde(default)]
    pub default_algorithm: Algorithm,

    /// Bounded wait for the fixed-window reset lock
    #[serde(default = "default_reset_lock_timeout")]
    pub reset_lock_timeout_ms: u64,

    /// Rule reload interval in seconds; zero disables reloading
    #[serde(default)]
    pub reload_interval_secs: u64,

    /// Log filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rules_path: None,
            default_algorithm: Algorithm::default(),
            reset_lock_timeout_ms: default_reset_lock_timeout(),
            reload_interval_secs: 0,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn default_reset_lock_timeout() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from `path` (if given) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(env);

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| QuotaError::Config(format!("Failed to load settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a file path, ignoring the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| QuotaError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.reset_lock_timeout_ms == 0 {
            return Err(QuotaError::Config(
                "reset_lock_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
