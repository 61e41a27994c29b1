//! Job-level settings, read from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.
//! Command-line flags are applied on top by the caller.

use crate::compile::{DuplicatePolicy, Precision};
use crate::stats::ScorerParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_REPORT_EVERY: usize = 10_000;
pub const DEFAULT_RANGE_SIZE: usize = 200_000;
pub const DEFAULT_MISSING_TOKENS: [&str; 5] = ["nan", "None", "N/A", "none", "NaN"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Pairs between progress log lines inside a batch.
    pub report_every: usize,
    /// Pairs per range when planning.
    pub range_size: usize,
    /// Element width of compiled value files.
    pub precision: Precision,
    pub duplicate_policy: DuplicatePolicy,
    pub mine_alpha: f64,
    /// Tokens read as missing by the tab importer, in addition to empty fields.
    pub missing_tokens: Vec<String>,
    /// Worker threads for local plan execution; all cores when unset.
    pub threads: Option<usize>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            report_every: DEFAULT_REPORT_EVERY,
            range_size: DEFAULT_RANGE_SIZE,
            precision: Precision::default(),
            duplicate_policy: DuplicatePolicy::default(),
            mine_alpha: ScorerParams::default().mine_alpha,
            missing_tokens: DEFAULT_MISSING_TOKENS.iter().map(|t| t.to_string()).collect(),
            threads: None,
        }
    }
}

impl JobConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_every == 0 {
            return Err(ConfigError::Invalid("report_every must be positive".into()));
        }
        if self.range_size == 0 {
            return Err(ConfigError::Invalid("range_size must be positive".into()));
        }
        if !(self.mine_alpha > 0.0 && self.mine_alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "mine_alpha must lie in (0, 1], got {}",
                self.mine_alpha
            )));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be positive when set".into()));
        }
        Ok(())
    }

    pub fn scorer_params(&self) -> ScorerParams {
        ScorerParams {
            mine_alpha: self.mine_alpha,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(&path, "").unwrap();
        let config = JobConfig::load(&path).unwrap();
        assert_eq!(config, JobConfig::default());
        assert_eq!(config.report_every, 10_000);
        assert_eq!(config.precision, Precision::F32);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Overwrite);
        assert_eq!(config.missing_tokens.len(), 5);
    }

    #[test]
    fn fields_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(
            &path,
            "report_every = 50\nprecision = \"f64\"\nduplicate_policy = \"reject\"\nthreads = 3\n",
        )
        .unwrap();
        let config = JobConfig::load(&path).unwrap();
        assert_eq!(config.report_every, 50);
        assert_eq!(config.precision, Precision::F64);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.thread_count(), 3);
        assert_eq!(config.range_size, DEFAULT_RANGE_SIZE);
    }

    #[test]
    fn save_and_load_agree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        let config = JobConfig {
            mine_alpha: 0.5,
            ..JobConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(JobConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(&path, "report_every = 0\n").unwrap();
        assert!(matches!(JobConfig::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "unknown_key = 1\n").unwrap();
        assert!(matches!(JobConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
