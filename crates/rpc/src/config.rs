//! Application configuration
//!
//! One JSON file with a section per component. Every field has a default, so
//! a partial file (or none at all) is valid.

use finepay_latefees::LateFeeSettings;
use finepay_points::PointsConfig;
use finepay_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "FINEPAY_CONFIG";

/// Environment variable overriding `database_url`
pub const DATABASE_URL_ENV: &str = "FINEPAY_DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default)]
    pub points: PointsConfig,

    #[serde(default)]
    pub late_fees: LateFeeSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_url() -> String {
    "sqlite://finepay.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            points: PointsConfig::default(),
            late_fees: LateFeeSettings::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve configuration for the binary
    ///
    /// Explicit path first, then `FINEPAY_CONFIG`, then defaults;
    /// `FINEPAY_DATABASE_URL` overrides the database in every case.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database_url = url;
        }
        Ok(config)
    }

    /// Point the database at a file path
    pub fn with_database_file(mut self, path: &Path) -> Self {
        self.database_url = format!("sqlite://{}", path.display());
        self
    }
}
