//! Repository configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

/// How localized columns are joined onto main rows on read.
///
/// Both strategies produce identical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Index the I18n table once per locale and coalesce the two aliases
    #[default]
    AliasedJoin,
    /// Look up each localized field separately per record
    Subquery,
}

/// Primary key generated for collections that do not declare one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Text UUID v4
    #[default]
    Uuid,
    /// 64-bit auto-increment integer
    Serial,
}

/// Repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Locale used for fallback reads and as the write locale when none is given
    pub default_locale: String,
    /// Locales accepted for writes (empty = any locale)
    pub locales: Vec<String>,
    /// Read strategy for localized columns
    pub fallback_strategy: FallbackStrategy,
    /// Job name used for deferred stage transitions
    pub transition_job_name: String,
    /// Default primary key for collections without a declared one
    pub id_strategy: IdStrategy,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
            locales: Vec::new(),
            fallback_strategy: FallbackStrategy::AliasedJoin,
            transition_job_name: "content.transition-stage".to_string(),
            id_strategy: IdStrategy::Uuid,
        }
    }
}

impl RepoConfig {
    /// Parses a configuration from JSON; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RepoConfig =
            serde_json::from_str(json).map_err(|e| RepoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    /// Checks that the default locale is among the configured locales.
    pub fn validate(&self) -> Result<()> {
        if self.default_locale.is_empty() {
            return Err(RepoError::Config("default_locale must not be empty".into()));
        }
        if !self.locales.is_empty() && !self.locales.contains(&self.default_locale) {
            return Err(RepoError::Config(format!(
                "default_locale '{}' is not listed in locales",
                self.default_locale
            )));
        }
        Ok(())
    }

    /// Returns true if writes in `locale` are accepted.
    pub fn accepts_locale(&self, locale: &str) -> bool {
        self.locales.is_empty() || self.locales.iter().any(|l| l == locale)
    }
}
