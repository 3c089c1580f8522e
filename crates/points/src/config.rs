//! Point engine configuration
//!
//! Every threshold and window is configurable; partial JSON falls back to the
//! defaults below. Per-government threshold overrides are stored in
//! `point_settings` and take precedence over `thresholds`.

use serde::{Deserialize, Serialize};

use crate::error::{PointsError, PointsResult};

/// Configuration for the Point Ledger Engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsConfig {
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Trailing window for the current demerit total
    #[serde(default = "default_window_days")]
    pub demerit_window_days: i64,

    /// Days from effective date to expiry of a demerit entry
    #[serde(default = "default_window_days")]
    pub demerit_validity_days: i64,

    /// Merit balance cap
    #[serde(default = "default_merit_max_points")]
    pub merit_max_points: i64,

    /// Merit points a profile may spend on offsets per period
    #[serde(default = "default_offset_cap_points")]
    pub offset_cap_points: i64,

    /// Rolling period the offset cap is measured over
    #[serde(default = "default_window_days")]
    pub offset_period_days: i64,

    /// What a violation does to the merit balance
    #[serde(default)]
    pub merit_penalty: MeritPenalty,

    #[serde(default)]
    pub milestones: MilestoneConfig,

    /// Expiry sweep ignores entries that expired more than this many days ago
    #[serde(default = "default_expiry_lookback_days")]
    pub expiry_lookback_days: i64,

    /// Attempts per operation when a balance compare-and-set loses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Ledger entries included in a status report
    #[serde(default = "default_recent_history_limit")]
    pub recent_history_limit: i64,
}

/// Demerit thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_warning_threshold")]
    pub warning: i64,

    #[serde(default = "default_suspension_threshold")]
    pub suspension: i64,

    #[serde(default = "default_revocation_threshold")]
    pub revocation: i64,

    /// Advisory warnings start this many points below the next sanction
    #[serde(default = "default_warning_margin")]
    pub warning_margin: i64,
}

impl Thresholds {
    pub fn validate(&self) -> PointsResult<()> {
        if self.warning <= 0 || self.warning >= self.suspension || self.suspension >= self.revocation {
            return Err(PointsError::Validation(format!(
                "thresholds must satisfy 0 < warning < suspension < revocation (got {}/{}/{})",
                self.warning, self.suspension, self.revocation
            )));
        }
        if self.warning_margin < 0 {
            return Err(PointsError::Validation(
                "warning margin must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: default_warning_threshold(),
            suspension: default_suspension_threshold(),
            revocation: default_revocation_threshold(),
            warning_margin: default_warning_margin(),
        }
    }
}

/// Effect of a violation on the merit balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum MeritPenalty {
    /// Forfeit the whole balance
    #[default]
    Reset,
    /// Forfeit up to `points`
    Deduct { points: i64 },
}

/// Clean-driving merit schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneConfig {
    #[serde(default = "default_six_month_days")]
    pub six_month_days: i64,
    #[serde(default = "default_six_month_points")]
    pub six_month_points: i64,
    #[serde(default = "default_twelve_month_days")]
    pub twelve_month_days: i64,
    #[serde(default = "default_twelve_month_points")]
    pub twelve_month_points: i64,
    #[serde(default = "default_two_year_days")]
    pub two_year_days: i64,
    #[serde(default = "default_two_year_bonus_points")]
    pub two_year_bonus_points: i64,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            six_month_days: default_six_month_days(),
            six_month_points: default_six_month_points(),
            twelve_month_days: default_twelve_month_days(),
            twelve_month_points: default_twelve_month_points(),
            two_year_days: default_two_year_days(),
            two_year_bonus_points: default_two_year_bonus_points(),
        }
    }
}

// Default value functions for serde
fn default_window_days() -> i64 {
    365
}

fn default_merit_max_points() -> i64 {
    100
}

fn default_offset_cap_points() -> i64 {
    3
}

fn default_expiry_lookback_days() -> i64 {
    730
}

fn default_max_retries() -> u32 {
    3
}

fn default_recent_history_limit() -> i64 {
    20
}

fn default_warning_threshold() -> i64 {
    8
}

fn default_suspension_threshold() -> i64 {
    12
}

fn default_revocation_threshold() -> i64 {
    18
}

fn default_warning_margin() -> i64 {
    3
}

fn default_six_month_days() -> i64 {
    180
}

fn default_six_month_points() -> i64 {
    5
}

fn default_twelve_month_days() -> i64 {
    365
}

fn default_twelve_month_points() -> i64 {
    10
}

fn default_two_year_days() -> i64 {
    730
}

fn default_two_year_bonus_points() -> i64 {
    20
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            demerit_window_days: default_window_days(),
            demerit_validity_days: default_window_days(),
            merit_max_points: default_merit_max_points(),
            offset_cap_points: default_offset_cap_points(),
            offset_period_days: default_window_days(),
            merit_penalty: MeritPenalty::default(),
            milestones: MilestoneConfig::default(),
            expiry_lookback_days: default_expiry_lookback_days(),
            max_retries: default_max_retries(),
            recent_history_limit: default_recent_history_limit(),
        }
    }
}

impl PointsConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Window over which the offset cap is measured, as a chrono Duration
    pub fn offset_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.offset_period_days)
    }

    pub fn expiry_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.expiry_lookback_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PointsConfig::default();
        assert_eq!(config.thresholds.warning, 8);
        assert_eq!(config.thresholds.suspension, 12);
        assert_eq!(config.thresholds.revocation, 18);
        assert_eq!(config.demerit_window_days, 365);
        assert_eq!(config.merit_max_points, 100);
        assert_eq!(config.offset_cap_points, 3);
        assert_eq!(config.merit_penalty, MeritPenalty::Reset);
        assert_eq!(config.milestones.two_year_bonus_points, 20);
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "thresholds": { "suspension": 15 },
            "merit_penalty": { "mode": "deduct", "points": 10 }
        }"#;
        let config: PointsConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.thresholds.suspension, 15);
        assert_eq!(config.thresholds.warning, 8); // default
        assert_eq!(config.merit_penalty, MeritPenalty::Deduct { points: 10 });
        assert_eq!(config.offset_cap_points, 3); // default
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::default().validate().is_ok());

        let inverted = Thresholds {
            warning: 12,
            suspension: 10,
            ..Thresholds::default()
        };
        assert!(matches!(inverted.validate(), Err(PointsError::Validation(_))));
    }

    #[test]
    fn test_duration_helpers() {
        let config = PointsConfig::default();
        assert_eq!(config.offset_period(), chrono::Duration::days(365));
        assert_eq!(config.expiry_lookback(), chrono::Duration::days(730));
    }
}
