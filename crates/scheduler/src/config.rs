//! Scheduler configuration

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{SchedulerError, SchedulerResult};

/// Configuration for the daily batch job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether `start` may run the timer at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Local wall-clock time of the daily run, `HH:MM`
    #[serde(default = "default_run_at")]
    pub run_at: String,

    /// Lock file that keeps the scheduler to one worker process
    #[serde(default = "default_lock_file")]
    pub lock_file: Option<PathBuf>,

    /// Also run point expiry and merit sweeps in the daily job
    #[serde(default = "default_enabled")]
    pub run_point_sweeps: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_run_at() -> String {
    "02:00".to_string()
}

fn default_lock_file() -> Option<PathBuf> {
    Some(std::env::temp_dir().join("finepay-scheduler.lock"))
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            run_at: default_run_at(),
            lock_file: default_lock_file(),
            run_point_sweeps: default_enabled(),
        }
    }
}

impl SchedulerConfig {
    /// Load settings from JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Parsed daily run time
    pub fn run_time(&self) -> SchedulerResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.run_at, "%H:%M").map_err(|e| {
            SchedulerError::InvalidConfig(format!("run_at {:?}: {}", self.run_at, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_time() {
        let config = SchedulerConfig::default();
        assert_eq!(config.run_time().unwrap(), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert!(config.run_point_sweeps);
    }

    #[test]
    fn test_invalid_run_time() {
        let config: SchedulerConfig = serde_json::from_str(r#"{ "run_at": "25:00" }"#).unwrap();
        assert!(matches!(config.run_time(), Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        std::fs::write(&path, r#"{ "enabled": false, "lock_file": null }"#).unwrap();

        let config = SchedulerConfig::from_file(&path).unwrap();
        assert!(!config.enabled);
        assert!(config.lock_file.is_none());
        assert_eq!(config.run_at, "02:00");
    }
}
