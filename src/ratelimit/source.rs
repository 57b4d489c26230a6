//! Where rule documents come from.

use std::path::{Path, PathBuf};
use tracing::info;

use super::rules::RuleConfig;
use crate::error::{QuotaError, Result};

/// Supported rule document encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    /// Pick a format from a file extension, case-insensitively.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(RuleFormat::Yaml),
            "json" => Some(RuleFormat::Json),
            _ => None,
        }
    }

    pub fn parse(&self, text: &str) -> Result<RuleConfig> {
        match self {
            RuleFormat::Yaml => RuleConfig::from_yaml(text),
            RuleFormat::Json => RuleConfig::from_json(text),
        }
    }
}

/// Produces rule snapshots on demand.
pub trait RuleSource: Send + Sync {
    fn load(&self) -> Result<RuleConfig>;

    /// A short human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Reads rules from a YAML or JSON file chosen by extension.
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
    format: RuleFormat,
}

impl FileRuleSource {
    /// Fails if the extension does not name a supported format.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let format = RuleFormat::from_extension(extension).ok_or_else(|| {
            QuotaError::Config(format!(
                "Unsupported rule file extension {:?} for {}",
                extension,
                path.display()
            ))
        })?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> RuleFormat {
        self.format
    }
}

impl RuleSource for FileRuleSource {
    fn load(&self) -> Result<RuleConfig> {
        info!(path = %self.path.display(), "Loading rate limit rules");
        let contents = std::fs::read_to_string(&self.path)?;
        self.format.parse(&contents)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed, in-memory rule document.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    config: RuleConfig,
}

impl StaticRuleSource {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }
}

impl RuleSource for StaticRuleSource {
    fn load(&self) -> Result<RuleConfig> {
        Ok(self.config.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
