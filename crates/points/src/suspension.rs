//! Suspension state machine
//!
//! `clear -> warning -> suspended -> revoked`, derived purely from the
//! recomputed demerit total. Sanction records are opened from the transitions
//! decided here; records end as `lifted`, `expired` or `superseded`.

use finepay_core::{LicenseStatus, SanctionType, SuspensionRecord};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;

/// Licence status for a demerit total
pub fn license_status(points: i64, thresholds: &Thresholds) -> LicenseStatus {
    if points >= thresholds.revocation {
        LicenseStatus::Revoked
    } else if points >= thresholds.suspension {
        LicenseStatus::Suspended
    } else if points >= thresholds.warning {
        LicenseStatus::Warning
    } else {
        LicenseStatus::Clear
    }
}

/// Where a profile stands against the thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdStatus {
    pub status: LicenseStatus,
    pub current_points: i64,
    pub warning_threshold: i64,
    pub suspension_threshold: i64,
    pub revocation_threshold: i64,
    pub points_until_suspension: i64,
    pub points_until_revocation: i64,
    /// Advisory messages; not state
    pub warnings: Vec<String>,
}

impl ThresholdStatus {
    pub fn evaluate(points: i64, thresholds: &Thresholds) -> Self {
        let status = license_status(points, thresholds);
        let until_suspension = (thresholds.suspension - points).max(0);
        let until_revocation = (thresholds.revocation - points).max(0);

        let mut warnings = Vec::new();
        match status {
            LicenseStatus::Clear | LicenseStatus::Warning => {
                if status == LicenseStatus::Warning {
                    warnings.push(format!(
                        "Warning threshold reached: {} demerit points",
                        points
                    ));
                }
                if until_suspension <= thresholds.warning_margin {
                    warnings.push(format!(
                        "{} point(s) away from licence suspension",
                        until_suspension
                    ));
                }
            }
            LicenseStatus::Suspended => {
                if until_revocation <= thresholds.warning_margin {
                    warnings.push(format!(
                        "{} point(s) away from licence revocation",
                        until_revocation
                    ));
                }
            }
            LicenseStatus::Revoked => {}
        }

        Self {
            status,
            current_points: points,
            warning_threshold: thresholds.warning,
            suspension_threshold: thresholds.suspension,
            revocation_threshold: thresholds.revocation,
            points_until_suspension: until_suspension,
            points_until_revocation: until_revocation,
            warnings,
        }
    }
}

/// What to do with sanction records after a recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanctionDecision {
    /// Nothing changes
    Keep,
    /// Open a new episode
    Impose(SanctionType),
    /// Replace the active suspension with a revocation
    Escalate { superseded_id: String },
}

/// Decide the sanction transition for a recomputed total.
///
/// At most one record is active per profile. A suspension is opened only when
/// none is active; a revocation supersedes an active suspension; an active
/// revocation is never duplicated.
pub fn decide(points: i64, thresholds: &Thresholds, active: Option<&SuspensionRecord>) -> SanctionDecision {
    if points >= thresholds.revocation {
        match active {
            Some(r) if r.sanction_type == SanctionType::Revocation => SanctionDecision::Keep,
            Some(r) => SanctionDecision::Escalate {
                superseded_id: r.id.clone(),
            },
            None => SanctionDecision::Impose(SanctionType::Revocation),
        }
    } else if points >= thresholds.suspension && active.is_none() {
        SanctionDecision::Impose(SanctionType::Suspension)
    } else {
        SanctionDecision::Keep
    }
}

/// Threshold a sanction type corresponds to
pub fn threshold_for(sanction_type: SanctionType, thresholds: &Thresholds) -> i64 {
    match sanction_type {
        SanctionType::Suspension => thresholds.suspension,
        SanctionType::Revocation => thresholds.revocation,
    }
}
