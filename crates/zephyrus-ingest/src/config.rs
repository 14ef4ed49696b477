//! Ingestion configuration
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file, then
//! `ZEPHYRUS_`-prefixed environment variables (a `.env` file is loaded
//! first). Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use zephyrus_common::{Result, ZephyrusError};

use crate::batch::DEFAULT_FLUSH_THRESHOLD;
use crate::extract::MissingAmountPolicy;
use crate::source::DEFAULT_EXTENSION;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "ZEPHYRUS_";

const DEFAULT_RESOURCE_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Bundle files processed concurrently (default: CPU count - 1, min 1)
    pub bundle_workers: usize,

    /// Entries processed concurrently within one bundle (default: 4)
    pub resource_workers: usize,

    /// Buffered records per kind that trigger a flush (default: 1000)
    pub batch_flush_threshold: usize,

    /// How missing monetary values are recorded (default: zero)
    pub missing_amount: MissingAmountPolicy,

    /// Directory of bundle files
    pub input_dir: PathBuf,

    /// Directory for CSV tables
    pub output_dir: PathBuf,

    /// Bundle file extension, without the dot (default: json)
    pub file_extension: String,

    /// When set, records go to PostgreSQL instead of CSV
    pub database_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bundle_workers: default_bundle_workers(),
            resource_workers: DEFAULT_RESOURCE_WORKERS,
            batch_flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            missing_amount: MissingAmountPolicy::default(),
            input_dir: PathBuf::from("data/bundles"),
            output_dir: PathBuf::from("data/output"),
            file_extension: DEFAULT_EXTENSION.to_string(),
            database_url: None,
        }
    }
}

fn default_bundle_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl IngestConfig {
    /// Load defaults, then `path` if given and present, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ZephyrusError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(ZephyrusError::config)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bundle_workers == 0 {
            return Err(ZephyrusError::config("bundle_workers must be greater than 0"));
        }
        if self.resource_workers == 0 {
            return Err(ZephyrusError::config("resource_workers must be greater than 0"));
        }
        if self.batch_flush_threshold == 0 {
            return Err(ZephyrusError::config(
                "batch_flush_threshold must be greater than 0",
            ));
        }
        if self.input_dir.as_os_str().is_empty() {
            return Err(ZephyrusError::config("input_dir cannot be empty"));
        }
        if self.output_dir.as_os_str().is_empty() && self.database_url.is_none() {
            return Err(ZephyrusError::config("output_dir cannot be empty"));
        }
        if self.file_extension.trim_start_matches('.').is_empty() {
            return Err(ZephyrusError::config("file_extension cannot be empty"));
        }
        Ok(())
    }

    // Builder methods

    pub fn with_bundle_workers(mut self, workers: usize) -> Self {
        self.bundle_workers = workers;
        self
    }

    pub fn with_resource_workers(mut self, workers: usize) -> Self {
        self.resource_workers = workers;
        self
    }

    pub fn with_batch_flush_threshold(mut self, threshold: usize) -> Self {
        self.batch_flush_threshold = threshold;
        self
    }

    pub fn with_missing_amount(mut self, policy: MissingAmountPolicy) -> Self {
        self.missing_amount = policy;
        self
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in [
            "ZEPHYRUS_BUNDLE_WORKERS",
            "ZEPHYRUS_RESOURCE_WORKERS",
            "ZEPHYRUS_BATCH_FLUSH_THRESHOLD",
            "ZEPHYRUS_MISSING_AMOUNT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert!(config.bundle_workers >= 1);
        assert_eq!(config.resource_workers, 4);
        assert_eq!(config.batch_flush_threshold, 1000);
        assert_eq!(config.missing_amount, MissingAmountPolicy::Zero);
        assert_eq!(config.file_extension, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(IngestConfig::default().with_bundle_workers(0).validate().is_err());
        assert!(IngestConfig::default().with_resource_workers(0).validate().is_err());
        assert!(IngestConfig::default()
            .with_batch_flush_threshold(0)
            .validate()
            .is_err());
        assert!(IngestConfig::default().with_input_dir("").validate().is_err());
        assert!(IngestConfig::default().with_file_extension(".").validate().is_err());
    }

    #[test]
    fn test_output_dir_optional_with_database() {
        let config = IngestConfig::default()
            .with_output_dir("")
            .with_database_url("postgres://localhost/zephyrus");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_layers_file_then_env() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "resource_workers = 8\nbatch_flush_threshold = 250\nmissing_amount = \"absent\""
        )
        .unwrap();

        std::env::set_var("ZEPHYRUS_BATCH_FLUSH_THRESHOLD", "50");
        let config = IngestConfig::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.resource_workers, 8);
        assert_eq!(config.batch_flush_threshold, 50);
        assert_eq!(config.missing_amount, MissingAmountPolicy::Absent);
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_env() {
        clear_env();
        std::env::set_var("ZEPHYRUS_RESOURCE_WORKERS", "0");
        let result = IngestConfig::load(None);
        clear_env();

        assert!(matches!(result, Err(ZephyrusError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = IngestConfig::load(Some(Path::new("/nonexistent/zephyrus.toml")));
        assert!(matches!(result, Err(ZephyrusError::Config(_))));
    }
}
