//! Late-fee engine settings
//!
//! Fee schedules themselves are per-government records in the store; these
//! settings only cover engine-wide defaults.

use chrono::Utc;
use finepay_core::{round_money, FeeStructure, LateFeeConfiguration};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Late-Fee Accrual Engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeSettings {
    /// Cycle length for configurations that do not set a usable one
    #[serde(default = "default_cycle_days")]
    pub default_cycle_days: i64,

    /// Grace period given to newly created configurations
    #[serde(default)]
    pub default_grace_period_days: i64,

    /// Round every computed amount to cents
    #[serde(default = "default_true")]
    pub round_amounts: bool,

    /// Send a notification for each applied fee
    #[serde(default = "default_true")]
    pub notify_citizens: bool,

    /// Upper bound on a single notification dispatch
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

fn default_cycle_days() -> i64 {
    7
}

fn default_true() -> bool {
    true
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

impl Default for LateFeeSettings {
    fn default() -> Self {
        Self {
            default_cycle_days: default_cycle_days(),
            default_grace_period_days: 0,
            round_amounts: true,
            notify_citizens: true,
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl LateFeeSettings {
    /// Load settings from JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Cycle length to use for a configuration
    pub fn cycle_days_for(&self, config: &LateFeeConfiguration) -> i64 {
        if config.cycle_days > 0 {
            config.cycle_days
        } else {
            self.default_cycle_days.max(1)
        }
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        if self.round_amounts {
            round_money(amount)
        } else {
            amount
        }
    }

    /// Government-wide configuration carrying these defaults
    pub fn new_configuration(&self, id: &str, government_id: &str, structure: FeeStructure) -> LateFeeConfiguration {
        let mut config = LateFeeConfiguration::government_wide(id, government_id, structure);
        config.grace_period_days = self.default_grace_period_days;
        config.cycle_days = self.default_cycle_days;
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;
        config
    }
}
