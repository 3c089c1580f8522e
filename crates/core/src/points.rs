//! Point ledger types
//!
//! `PointsHistory` is the authoritative, append-only ledger. The balance records
//! are caches of what a rescan of the ledger yields.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::suspension::LicenseStatus;

/// Merit or demerit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    Merit,
    Demerit,
}

/// Why a ledger entry exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Demerits assigned for an offence
    ViolationAdded,
    /// Merit granted by the clean-driving sweep
    MeritEarned,
    /// Merit granted by an administrator or gamification event
    MeritAdded,
    /// Merit exchanged for demerit forgiveness (one entry per side)
    Offset,
    /// Merit forfeited because of a violation
    MeritForfeited,
}

/// Lifecycle of a ledger entry. Only `Active -> Expired` is ever written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Expired,
    Voided,
}

/// Where a point mutation came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSource {
    pub ticket_id: Option<String>,
    pub reason: Option<String>,
}

impl PointSource {
    pub fn ticket(ticket_id: impl Into<String>) -> Self {
        Self {
            ticket_id: Some(ticket_id.into()),
            reason: None,
        }
    }

    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            ticket_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsHistory {
    pub id: String,
    pub government_id: String,
    pub profile_id: String,
    pub transaction_type: TransactionType,
    pub point_type: PointType,
    /// Signed change; negative for offsets and forfeits
    pub points_delta: i64,
    pub offence_code: Option<String>,
    pub source_ticket_id: Option<String>,
    pub reason: Option<String>,
    /// Violation entry an offset entry forgives
    pub offsets_entry_id: Option<String>,
    pub effective_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub status: EntryStatus,
    /// Snapshot of the owning balance right after this entry
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

impl PointsHistory {
    /// Whether this entry counts toward the rolling demerit total on `today`.
    ///
    /// Active demerit entries whose effective date lies in the trailing window
    /// `(today - window_days, today]` and which have not yet reached their expiry.
    pub fn in_demerit_window(&self, today: NaiveDate, window_days: i64) -> bool {
        self.point_type == PointType::Demerit
            && self.status == EntryStatus::Active
            && self.effective_date <= today
            && self.effective_date > today - Duration::days(window_days)
            && self.expiry_date.map_or(true, |expiry| expiry > today)
    }

    pub fn is_violation(&self) -> bool {
        self.transaction_type == TransactionType::ViolationAdded
    }
}

/// Offence-to-points mapping, optionally banded by a measured value
/// (e.g. km/h over the limit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRule {
    pub id: String,
    pub government_id: String,
    pub offence_code: String,
    pub description: Option<String>,
    pub points: i64,
    /// Inclusive lower bound
    pub min_value: Option<Decimal>,
    /// Exclusive upper bound
    pub max_value: Option<Decimal>,
    pub active: bool,
}

impl PenaltyRule {
    /// Whether this rule applies to a measured value.
    ///
    /// Rules without a range apply only when no value was measured.
    pub fn matches(&self, value: Option<Decimal>) -> bool {
        if !self.active {
            return false;
        }
        match (value, self.min_value, self.max_value) {
            (None, None, None) => true,
            (None, _, _) => false,
            (Some(_), None, None) => false,
            (Some(v), min, max) => {
                min.map_or(true, |min| v >= min) && max.map_or(true, |max| v < max)
            }
        }
    }
}

/// Cached demerit aggregate for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemeritBalance {
    pub profile_id: String,
    pub government_id: String,
    pub current_points: i64,
    /// Violation entries still counting toward the window
    pub active_entries: i64,
    pub status: LicenseStatus,
    pub last_suspension_date: Option<NaiveDate>,
    pub total_expired: i64,
    /// Compare-and-set token
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl DemeritBalance {
    pub fn new(profile_id: &str, government_id: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            government_id: government_id.to_string(),
            current_points: 0,
            active_entries: 0,
            status: LicenseStatus::Clear,
            last_suspension_date: None,
            total_expired: 0,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Cached merit aggregate for one profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeritBalance {
    pub profile_id: String,
    pub government_id: String,
    pub current_points: i64,
    pub max_points: i64,
    pub total_earned: i64,
    pub total_used: i64,
    pub total_expired: i64,
    pub exemplary: bool,
    pub last_award_date: Option<NaiveDate>,
    pub two_year_bonus_awarded: bool,
    /// Compare-and-set token
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl MeritBalance {
    pub fn new(profile_id: &str, government_id: &str, max_points: i64) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            government_id: government_id.to_string(),
            current_points: 0,
            max_points,
            total_earned: 0,
            total_used: 0,
            total_expired: 0,
            exemplary: false,
            last_award_date: None,
            two_year_bonus_awarded: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Points that can still be awarded before the cap
    pub fn headroom(&self) -> i64 {
        (self.max_points - self.current_points).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn entry(effective: NaiveDate, delta: i64) -> PointsHistory {
        PointsHistory {
            id: "E-1".to_string(),
            government_id: "GOV-1".to_string(),
            profile_id: "P-1".to_string(),
            transaction_type: TransactionType::ViolationAdded,
            point_type: PointType::Demerit,
            points_delta: delta,
            offence_code: Some("SPD".to_string()),
            source_ticket_id: None,
            reason: None,
            offsets_entry_id: None,
            effective_date: effective,
            expiry_date: Some(effective + Duration::days(365)),
            status: EntryStatus::Active,
            balance_after: delta,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_window_boundaries() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(entry(today, 3).in_demerit_window(today, 365));
        assert!(entry(today - Duration::days(364), 3).in_demerit_window(today, 365));
        assert!(!entry(today - Duration::days(365), 3).in_demerit_window(today, 365));
        assert!(!entry(today + Duration::days(1), 3).in_demerit_window(today, 365));
    }

    #[test]
    fn test_expired_entry_outside_window() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut e = entry(today, 3);
        e.status = EntryStatus::Expired;
        assert!(!e.in_demerit_window(today, 365));
    }

    #[test]
    fn test_penalty_rule_banding() {
        let rule = PenaltyRule {
            id: "R-1".to_string(),
            government_id: "GOV-1".to_string(),
            offence_code: "SPEEDING".to_string(),
            description: None,
            points: 3,
            min_value: Some(dec!(10)),
            max_value: Some(dec!(20)),
            active: true,
        };
        assert!(rule.matches(Some(dec!(10))));
        assert!(rule.matches(Some(dec!(19.9))));
        assert!(!rule.matches(Some(dec!(20))));
        assert!(!rule.matches(Some(dec!(9))));
        assert!(!rule.matches(None));
    }

    #[test]
    fn test_unbanded_rule_needs_no_value() {
        let rule = PenaltyRule {
            id: "R-2".to_string(),
            government_id: "GOV-1".to_string(),
            offence_code: "RED_LIGHT".to_string(),
            description: None,
            points: 4,
            min_value: None,
            max_value: None,
            active: true,
        };
        assert!(rule.matches(None));
        assert!(!rule.matches(Some(dec!(5))));
    }

    #[test]
    fn test_merit_headroom() {
        let mut balance = MeritBalance::new("P-1", "GOV-1", 100);
        balance.current_points = 95;
        assert_eq!(balance.headroom(), 5);
        balance.current_points = 100;
        assert_eq!(balance.headroom(), 0);
    }

    #[test]
    fn test_transaction_type_string_form() {
        assert_eq!(TransactionType::ViolationAdded.to_string(), "violation_added");
        assert_eq!(
            TransactionType::from_str("merit_forfeited").unwrap(),
            TransactionType::MeritForfeited
        );
    }
}
