//! Import configuration
//!
//! Settings can come from a JSON file; every field except `store_dir` has a
//! default, and the CLI overrides individual values with flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::retry::RetryConfig;

/// Default number of scanned records between progress events
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory holding one JSON record per date
    pub store_dir: PathBuf,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Remove the source archive once it has been read
    #[serde(default)]
    pub delete_source: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ImportConfig {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            delete_source: false,
            retry: RetryConfig::default(),
        }
    }

    /// Load a configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, ImportError> {
        let content = fs::read_to_string(path).map_err(|e| ImportError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: ImportConfig =
            serde_json::from_str(&content).map_err(|e| ImportError::Config {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ImportError> {
        if self.progress_interval == 0 {
            return Err(ImportError::Config {
                path: path.to_path_buf(),
                message: "progress_interval must be greater than zero".to_string(),
            });
        }
        if self.retry.exponential_base < 1.0 {
            return Err(ImportError::Config {
                path: path.to_path_buf(),
                message: "retry.exponential_base must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.json");
        fs::write(&path, r#"{"store_dir": "/data/days", "retry": {"max_attempts": 5}}"#).unwrap();

        let config = ImportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/data/days"));
        assert_eq!(config.progress_interval, 10_000);
        assert!(!config.delete_source);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 50);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.json");

        fs::write(&path, r#"{"progress_interval": 10}"#).unwrap();
        assert!(matches!(
            ImportConfig::from_json_file(&path),
            Err(ImportError::Config { .. })
        ));

        fs::write(&path, r#"{"store_dir": "d", "progress_interval": 0}"#).unwrap();
        let err = ImportConfig::from_json_file(&path).unwrap_err();
        assert!(err.to_string().contains("progress_interval"));

        assert!(ImportConfig::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}
