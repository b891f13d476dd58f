//! Run configuration, loaded from TOML.
//!
//! ```
//! use rulebook_engine::config::RunConfig;
//!
//! let config = RunConfig::from_toml_str("export_precision = 4\nparallel = true").unwrap();
//! assert_eq!(config.export_precision, 4);
//! assert_eq!(config.tolerance, 1.5e-6);
//! ```

use crate::validation::ValidationScope;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Highest export precision an f64 can carry meaningfully.
const MAX_PRECISION: u32 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by evaluation, validation and the conformance harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Decimal places kept when exporting numbers.
    pub export_precision: u32,
    /// Absolute tolerance for numeric comparison.
    pub tolerance: f64,
    /// Wall-clock budget per engine in the harness.
    pub engine_timeout_secs: u64,
    /// Row-parallel evaluation in the eager engine.
    pub parallel: bool,
    pub scope: ValidationScope,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            export_precision: 6,
            tolerance: 1.5e-6,
            engine_timeout_secs: 120,
            parallel: false,
            scope: ValidationScope::Computed,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_precision > MAX_PRECISION {
            return Err(ConfigError::Invalid(format!(
                "export_precision must be at most {}, got {}",
                MAX_PRECISION, self.export_precision
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::Invalid(format!("tolerance must be positive and finite, got {}", self.tolerance)));
        }
        if self.engine_timeout_secs == 0 {
            return Err(ConfigError::Invalid("engine_timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn with_export_precision(mut self, precision: u32) -> Self {
        self.export_precision = precision;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_engine_timeout_secs(mut self, secs: u64) -> Self {
        self.engine_timeout_secs = secs;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_scope(mut self, scope: ValidationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = RunConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.engine_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_full_document() {
        let config = RunConfig::from_toml_str(
            r#"
            export_precision = 4
            tolerance = 1e-4
            engine_timeout_secs = 10
            parallel = true
            scope = "all"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            RunConfig::new()
                .with_export_precision(4)
                .with_tolerance(1e-4)
                .with_engine_timeout_secs(10)
                .with_parallel(true)
                .with_scope(ValidationScope::All)
        );
    }

    #[rstest]
    #[case::precision("export_precision = 16")]
    #[case::zero_tolerance("tolerance = 0.0")]
    #[case::negative_tolerance("tolerance = -1e-6")]
    #[case::infinite_tolerance("tolerance = inf")]
    #[case::zero_timeout("engine_timeout_secs = 0")]
    fn test_rejects_invalid_values(#[case] toml: &str) {
        assert!(matches!(RunConfig::from_toml_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case::unknown_key("precision = 6")]
    #[case::bad_scope("scope = \"everything\"")]
    fn test_rejects_malformed_documents(#[case] toml: &str) {
        assert!(matches!(RunConfig::from_toml_str(toml), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = true").unwrap();
        assert!(RunConfig::load(file.path()).unwrap().parallel);
        assert!(matches!(RunConfig::load("/nonexistent/run.toml"), Err(ConfigError::Io(_))));
    }
}
